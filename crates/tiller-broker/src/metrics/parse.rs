//! Parsers for remote metric command output
//!
//! Each parser targets the fixed output shape of one known command and
//! tolerates missing or short fields by substituting `"N/A"` instead of
//! raising. Only the network parser can decline entirely (no matching
//! interface line), which degrades to a zero rate upstream.

use tiller_core::ipc::{DiskStats, MemoryStats, SystemInfo};

use crate::ops::shell_quote;

/// Placeholder for fields the remote output did not provide
const NOT_AVAILABLE: &str = "N/A";

/// Human-readable uptime
pub const UPTIME_COMMAND: &str = "uptime -p";

/// Memory usage in MiB
pub const MEMORY_COMMAND: &str = "free -m";

/// Root filesystem usage
pub const DISK_COMMAND: &str = "df -h /";

/// Aggregate CPU usage percentage (100 minus the idle column)
pub const CPU_COMMAND: &str = "top -bn1 | grep 'Cpu(s)' | awk '{print 100 - $8}'";

/// Host identity: kernel, architecture, distro name, CPU model, one per line
pub const SYSTEM_COMMAND: &str = "uname -r; uname -m; \
    grep -oP 'PRETTY_NAME=\"\\K[^\"]+' /etc/os-release; \
    grep -m1 'model name' /proc/cpuinfo | cut -d: -f2-";

/// Raw interface byte counters
pub const NETWORK_COMMAND: &str = "cat /proc/net/dev";

/// Tolerant service check: the unit's state lands on stdout and the exit
/// code is always zero, so an inactive service is data, not an error.
pub fn service_command(name: &str) -> String {
    format!("systemctl is-active {} 2>/dev/null || true", shell_quote(name))
}

/// Stateless parsers for the commands above
pub struct MetricsParser;

impl MetricsParser {
    /// Parse `uptime -p` output ("up 3 days, 2 hours")
    pub fn parse_uptime(output: &str) -> String {
        let line = output.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return NOT_AVAILABLE.to_string();
        }
        line.strip_prefix("up ").unwrap_or(line).to_string()
    }

    /// Parse `free -m` output: fixed positions on the second line
    ///
    /// ```text
    ///               total        used        free   ...
    /// Mem:          15923        8012        1204   ...
    /// ```
    pub fn parse_memory(output: &str) -> MemoryStats {
        let fields: Vec<&str> = output
            .lines()
            .nth(1)
            .map(|l| l.split_whitespace().collect())
            .unwrap_or_default();

        MemoryStats {
            total: field(&fields, 1),
            used: field(&fields, 2),
            free: field(&fields, 3),
        }
    }

    /// Parse `df -h /` output: fixed positions on the second line
    ///
    /// ```text
    /// Filesystem      Size  Used Avail Use% Mounted on
    /// /dev/sda1        98G   41G   52G  45% /
    /// ```
    pub fn parse_disk(output: &str) -> DiskStats {
        let fields: Vec<&str> = output
            .lines()
            .nth(1)
            .map(|l| l.split_whitespace().collect())
            .unwrap_or_default();

        DiskStats {
            total: field(&fields, 1),
            used: field(&fields, 2),
            available: field(&fields, 3),
            percent: field(&fields, 4),
        }
    }

    /// Parse the CPU command output: one float on the first line
    pub fn parse_cpu(output: &str) -> String {
        output
            .lines()
            .next()
            .and_then(|l| l.trim().parse::<f64>().ok())
            .map(|pct| format!("{:.1}", pct))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Parse the system command output: four fixed lines
    pub fn parse_system(output: &str) -> SystemInfo {
        let lines: Vec<&str> = output.lines().collect();
        let line = |i: usize| -> String {
            lines
                .get(i)
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .unwrap_or(NOT_AVAILABLE)
                .to_string()
        };

        SystemInfo {
            kernel: line(0),
            arch: line(1),
            os: line(2),
            cpu_model: line(3),
        }
    }

    /// Scan `/proc/net/dev` output for the first physical interface line
    /// (`eth`/`enp`/`ens` prefix followed by a digit) and extract the
    /// receive/transmit byte counters at their fixed column offsets.
    ///
    /// Returns `None` when no matching interface line exists; the caller
    /// reports a zero rate in that case.
    pub fn parse_network(output: &str) -> Option<(u64, u64)> {
        for line in output.lines() {
            let Some((iface, counters)) = line.split_once(':') else {
                continue;
            };
            if !is_physical_interface(iface.trim()) {
                continue;
            }

            let fields: Vec<&str> = counters.split_whitespace().collect();
            let rx = fields.first().and_then(|f| f.parse().ok()).unwrap_or(0);
            let tx = fields.get(8).and_then(|f| f.parse().ok()).unwrap_or(0);
            return Some((rx, tx));
        }
        None
    }
}

fn field(fields: &[&str], index: usize) -> String {
    fields
        .get(index)
        .map(|f| (*f).to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn is_physical_interface(name: &str) -> bool {
    ["eth", "enp", "ens"].iter().any(|prefix| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uptime() {
        assert_eq!(
            MetricsParser::parse_uptime("up 3 days, 2 hours\n"),
            "3 days, 2 hours"
        );
        assert_eq!(MetricsParser::parse_uptime(""), "N/A");
    }

    #[test]
    fn test_parse_memory() {
        let output = "\
              total        used        free      shared  buff/cache   available
Mem:          15923        8012        1204         672        6706        6879
Swap:          2047           0        2047
";
        let mem = MetricsParser::parse_memory(output);
        assert_eq!(mem.total, "15923");
        assert_eq!(mem.used, "8012");
        assert_eq!(mem.free, "1204");
    }

    #[test]
    fn test_parse_memory_short_output() {
        let mem = MetricsParser::parse_memory("header only\n");
        assert_eq!(mem.total, "N/A");
        assert_eq!(mem.used, "N/A");
        assert_eq!(mem.free, "N/A");
    }

    #[test]
    fn test_parse_disk() {
        let output = "\
Filesystem      Size  Used Avail Use% Mounted on
/dev/sda1        98G   41G   52G  45% /
";
        let disk = MetricsParser::parse_disk(output);
        assert_eq!(disk.total, "98G");
        assert_eq!(disk.used, "41G");
        assert_eq!(disk.available, "52G");
        assert_eq!(disk.percent, "45%");
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(MetricsParser::parse_cpu("23.4\n"), "23.4");
        assert_eq!(MetricsParser::parse_cpu("7\n"), "7.0");
        assert_eq!(MetricsParser::parse_cpu("garbage\n"), "N/A");
        assert_eq!(MetricsParser::parse_cpu(""), "N/A");
    }

    #[test]
    fn test_parse_system() {
        let output = "\
6.8.0-45-generic
x86_64
Ubuntu 24.04.1 LTS
 Intel(R) Xeon(R) E-2288G CPU @ 3.70GHz
";
        let info = MetricsParser::parse_system(output);
        assert_eq!(info.kernel, "6.8.0-45-generic");
        assert_eq!(info.arch, "x86_64");
        assert_eq!(info.os, "Ubuntu 24.04.1 LTS");
        assert_eq!(info.cpu_model, "Intel(R) Xeon(R) E-2288G CPU @ 3.70GHz");
    }

    #[test]
    fn test_parse_system_missing_lines() {
        let info = MetricsParser::parse_system("6.8.0-45-generic\n");
        assert_eq!(info.kernel, "6.8.0-45-generic");
        assert_eq!(info.arch, "N/A");
        assert_eq!(info.os, "N/A");
        assert_eq!(info.cpu_model, "N/A");
    }

    #[test]
    fn test_parse_network_picks_first_physical_interface() {
        let output = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  200000     500    0    0    0     0          0         0  200000     500    0    0    0     0       0          0
  eth0: 1000000    1000    0    0    0     0          0         0  500000     800    0    0    0     0       0          0
  eth1: 9999999    9999    0    0    0     0          0         0  999999     999    0    0    0     0       0          0
";
        let (rx, tx) = MetricsParser::parse_network(output).unwrap();
        assert_eq!(rx, 1_000_000);
        assert_eq!(tx, 500_000);
    }

    #[test]
    fn test_parse_network_matches_predictable_names() {
        let output =
            "enp3s0: 4096 10 0 0 0 0 0 0 2048 8 0 0 0 0 0 0\n";
        assert_eq!(MetricsParser::parse_network(output), Some((4096, 2048)));

        let output = "ens5: 100 1 0 0 0 0 0 0 50 1 0 0 0 0 0 0\n";
        assert_eq!(MetricsParser::parse_network(output), Some((100, 50)));
    }

    #[test]
    fn test_parse_network_no_matching_interface() {
        let output = "\
    lo:  200000     500    0    0    0     0          0         0  200000     500    0    0    0     0       0          0
 wlan0:  300000     600    0    0    0     0          0         0  300000     600    0    0    0     0       0          0
";
        assert_eq!(MetricsParser::parse_network(output), None);

        // A name that merely starts with a known prefix is not enough
        assert_eq!(
            MetricsParser::parse_network("ethernet: 1 2 3 4 5 6 7 8 9\n"),
            None
        );
    }

    #[test]
    fn test_service_command_quotes_name() {
        let cmd = service_command("nginx");
        assert!(cmd.contains("systemctl is-active 'nginx'"));
        assert!(cmd.ends_with("|| true"));
    }
}
