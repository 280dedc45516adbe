//! Scripted runner for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::runner::{ProcessRunner, RunError, RunOutput};

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Call {
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }
}

enum Reply {
    Ok(RunOutput),
    Timeout,
}

/// Replies are matched by subcommand in FIFO order; unscripted calls succeed
/// with empty output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, subcommand: &str, reply: Reply) {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(name, _)| name == subcommand) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((subcommand.to_string(), VecDeque::from([reply]))),
        }
    }

    pub fn reply(&self, subcommand: &str, stdout: &str) -> &Self {
        self.push(
            subcommand,
            Reply::Ok(RunOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
        );
        self
    }

    pub fn fail(&self, subcommand: &str, code: i32, stderr: &str) -> &Self {
        self.push(
            subcommand,
            Reply::Ok(RunOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: Some(code),
            }),
        );
        self
    }

    pub fn time_out(&self, subcommand: &str) -> &Self {
        self.push(subcommand, Reply::Timeout);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.subcommand().to_string())
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<RunOutput, RunError> {
        let call = Call {
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: stdin.map(str::to_string),
        };
        let subcommand = call.subcommand().to_string();
        self.calls.lock().unwrap().push(call);

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .iter_mut()
                .find(|(name, _)| *name == subcommand)
                .and_then(|(_, queue)| queue.pop_front())
        };

        match reply {
            Some(Reply::Ok(out)) => Ok(out),
            Some(Reply::Timeout) => Err(RunError::Timeout {
                program: "tmux".to_string(),
                subcommand,
                timeout: std::time::Duration::from_secs(5),
            }),
            None => Ok(RunOutput {
                exit_code: Some(0),
                ..RunOutput::default()
            }),
        }
    }
}
