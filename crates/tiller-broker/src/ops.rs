//! One-shot remote operations: process listing/kill and crontab management
//!
//! Each operation composes a shell command, runs it through a
//! [`CommandRunner`], and parses the output. Anything user-supplied that
//! lands in a command line goes through [`shell_quote`].

use tiller_core::ipc::ProcessEntry;
use tiller_core::BrokerError;

use crate::ssh::CommandRunner;

/// Process listing, heaviest CPU consumers first
const PROCESS_LIST_COMMAND: &str = "ps aux --sort=-%cpu";

/// Tolerant crontab read: a user without a crontab is an empty list, not an
/// error (`crontab -l` exits 1 in that case)
const CRON_LIST_COMMAND: &str = "crontab -l 2>/dev/null || true";

/// Default log file for `cron:readLog`
const DEFAULT_CRON_LOG: &str = "/var/log/syslog";

/// Single-quote a value for safe interpolation into a shell command
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// List remote processes via `ps aux`
pub async fn process_list<R: CommandRunner + ?Sized>(
    runner: &R,
) -> Result<Vec<ProcessEntry>, BrokerError> {
    let output = runner.exec(PROCESS_LIST_COMMAND).await?;
    Ok(parse_process_list(&output.stdout))
}

/// Terminate a remote process. The pid is numeric by construction, so no
/// quoting is needed.
pub async fn process_kill<R: CommandRunner + ?Sized>(
    runner: &R,
    pid: u32,
) -> Result<(), BrokerError> {
    runner.exec(&format!("kill {}", pid)).await?;
    Ok(())
}

/// Read the remote user's crontab; absent crontab yields an empty string
pub async fn cron_list<R: CommandRunner + ?Sized>(runner: &R) -> Result<String, BrokerError> {
    let output = runner.exec(CRON_LIST_COMMAND).await?;
    Ok(output.stdout)
}

/// Replace the remote user's crontab with `content`
pub async fn cron_save<R: CommandRunner + ?Sized>(
    runner: &R,
    content: &str,
) -> Result<(), BrokerError> {
    let command = format!("printf '%s\\n' {} | crontab -", shell_quote(content));
    runner.exec(&command).await?;
    Ok(())
}

/// Tail cron-related lines from a remote log file
pub async fn cron_read_log<R: CommandRunner + ?Sized>(
    runner: &R,
    path: Option<&str>,
) -> Result<String, BrokerError> {
    let path = path.unwrap_or(DEFAULT_CRON_LOG);
    let command = format!(
        "grep CRON {} 2>/dev/null | tail -n 100 || true",
        shell_quote(path)
    );
    let output = runner.exec(&command).await?;
    Ok(output.stdout)
}

/// Parse `ps aux` output.
///
/// Fixed columns: USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND;
/// the command is everything from the 11th field on. Malformed lines are
/// skipped.
fn parse_process_list(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 11 {
                return None;
            }
            let pid = fields[1].parse().ok()?;
            Some(ProcessEntry {
                pid,
                user: fields[0].to_string(),
                cpu: fields[2].to_string(),
                mem: fields[3].to_string(),
                command: fields[10..].join(" "),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::ExecOutput;
    use async_trait::async_trait;

    #[test]
    fn test_shell_quote_plain_value() {
        assert_eq!(shell_quote("nginx"), "'nginx'");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_parse_process_list() {
        let output = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.0  0.1 167664 11788 ?        Ss   Jan01   0:04 /sbin/init splash
www-data    1234  2.5  1.2 221000 48000 ?        S    Jan02   1:23 nginx: worker process
broken line
";
        let entries = parse_process_list(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pid, 1);
        assert_eq!(entries[0].user, "root");
        assert_eq!(entries[0].command, "/sbin/init splash");
        assert_eq!(entries[1].pid, 1234);
        assert_eq!(entries[1].cpu, "2.5");
        assert_eq!(entries[1].command, "nginx: worker process");
    }

    struct EchoRunner {
        last: tokio::sync::Mutex<String>,
    }

    #[async_trait]
    impl CommandRunner for EchoRunner {
        async fn exec(&self, command: &str) -> Result<ExecOutput, BrokerError> {
            *self.last.lock().await = command.to_string();
            Ok(ExecOutput::default())
        }
    }

    #[tokio::test]
    async fn test_cron_save_quotes_content() {
        let runner = EchoRunner {
            last: tokio::sync::Mutex::new(String::new()),
        };

        cron_save(&runner, "* * * * * echo 'hi'").await.unwrap();

        let command = runner.last.lock().await.clone();
        assert!(command.starts_with("printf"));
        assert!(command.ends_with("| crontab -"));
        // The embedded quote must have been escaped
        assert!(command.contains("echo '\\''hi'\\''"));
    }

    #[tokio::test]
    async fn test_cron_read_log_uses_default_path() {
        let runner = EchoRunner {
            last: tokio::sync::Mutex::new(String::new()),
        };

        cron_read_log(&runner, None).await.unwrap();
        assert!(runner.last.lock().await.contains("/var/log/syslog"));

        cron_read_log(&runner, Some("/var/log/cron")).await.unwrap();
        assert!(runner.last.lock().await.contains("'/var/log/cron'"));
    }
}
