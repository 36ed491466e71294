use std::num::{NonZeroU32, NonZeroU64};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use evtally_common::{
    EXEC_COMM_MAP_MAX_ENTRIES, EXEC_PID_MAP_MAX_ENTRIES, PACKET_LOG_INTERVAL,
    PROC_INFO_MAP_MAX_ENTRIES, TRAFFIC_REPORT_THRESHOLD,
};

#[derive(Parser, Debug)]
#[command(
    name = "evtally",
    version,
    about = "Lock-free exec and packet counters driven by a synthetic event stream"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every handler on worker threads and print the final counters
    Simulate(SimulateArgs),
}

/// Table capacities. Fixed for the lifetime of a run.
#[derive(Args, Debug, Clone)]
pub struct TableArgs {
    /// Capacity of the pid -> exec count table
    #[arg(long, default_value_t = EXEC_PID_MAP_MAX_ENTRIES as usize, value_parser = validate_capacity)]
    pub pid_capacity: usize,

    /// Capacity of the name -> exec count table
    #[arg(long, default_value_t = EXEC_COMM_MAP_MAX_ENTRIES as usize, value_parser = validate_capacity)]
    pub comm_capacity: usize,

    /// Capacity of the pid -> {comm, pid, count} table
    #[arg(long, default_value_t = PROC_INFO_MAP_MAX_ENTRIES as usize, value_parser = validate_capacity)]
    pub info_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub tables: TableArgs,

    /// Worker threads, one execution context each [default: 4]
    #[arg(long, default_value_t = 4, value_parser = validate_workers)]
    pub workers: usize,

    /// Events generated per worker [default: 100000]
    #[arg(long, default_value_t = 100_000)]
    pub events: u64,

    /// Packets per worker between two traffic reports
    #[arg(long, default_value_t = TRAFFIC_REPORT_THRESHOLD, value_parser = validate_threshold)]
    pub threshold: u32,

    /// Synthetic pids are drawn from 1..=pid-range [default: 4096]
    #[arg(long, default_value_t = 4096, value_parser = validate_pid_range)]
    pub pid_range: u32,

    /// The packet counter logs every Nth packet
    #[arg(long, default_value_t = PACKET_LOG_INTERVAL, value_parser = validate_log_every)]
    pub log_every: u64,

    /// Snapshot polling interval in seconds [default: 1.0]
    #[arg(long, default_value_t = 1.0, value_parser = validate_interval)]
    pub poll_interval: f64,

    /// Report lines buffered before new ones are dropped [default: 1024]
    #[arg(long, default_value_t = 1024, value_parser = validate_trace_buffer)]
    pub trace_buffer: usize,

    /// Seed of the synthetic event stream [default: 0]
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Output format of the final snapshot [default: tsv]
    #[arg(long, default_value = "tsv")]
    pub format: OutputFormat,

    /// Also print every polled snapshot while the run is in progress
    #[arg(long)]
    pub watch: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    Json,
    Pretty,
    /// Prometheus text exposition
    Prometheus,
}

fn parse_u64(s: &str) -> Result<u64, String> {
    s.parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))
}

fn validate_workers(s: &str) -> Result<usize, String> {
    match parse_u64(s)? {
        0 => Err("workers must be at least 1".to_string()),
        n if n > 256 => Err("workers must be at most 256".to_string()),
        n => Ok(n as usize),
    }
}

fn validate_capacity(s: &str) -> Result<usize, String> {
    match parse_u64(s)? {
        0 => Err("capacity must be at least 1".to_string()),
        n if n > 1 << 24 => Err("capacity must be at most 16777216".to_string()),
        n => Ok(n as usize),
    }
}

fn validate_threshold(s: &str) -> Result<u32, String> {
    let val: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("threshold must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

fn validate_pid_range(s: &str) -> Result<u32, String> {
    let val: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("pid-range must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

fn validate_log_every(s: &str) -> Result<u64, String> {
    match parse_u64(s)? {
        0 => Err("log-every must be at least 1".to_string()),
        n => Ok(n),
    }
}

fn validate_trace_buffer(s: &str) -> Result<usize, String> {
    match parse_u64(s)? {
        0 => Err("trace-buffer must be at least 1".to_string()),
        n if n > 1 << 20 => Err("trace-buffer must be at most 1048576".to_string()),
        n => Ok(n as usize),
    }
}

fn validate_interval(s: &str) -> Result<f64, String> {
    let val: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if val < 0.1 {
        Err("poll-interval must be at least 0.1 seconds".to_string())
    } else if val > 10.0 {
        Err("poll-interval must be at most 10.0 seconds".to_string())
    } else {
        Ok(val)
    }
}

/// Everything a simulation run needs, after validation.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub workers: usize,
    pub events_per_worker: u64,
    pub threshold: NonZeroU32,
    pub pid_range: u32,
    pub pid_capacity: usize,
    pub comm_capacity: usize,
    pub info_capacity: usize,
    pub log_every: NonZeroU64,
    pub poll_interval: Duration,
    pub trace_buffer: usize,
    pub seed: u64,
    pub format: OutputFormat,
    pub watch: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            events_per_worker: 100_000,
            threshold: NonZeroU32::new(TRAFFIC_REPORT_THRESHOLD).unwrap_or(NonZeroU32::MIN),
            pid_range: 4096,
            pid_capacity: EXEC_PID_MAP_MAX_ENTRIES as usize,
            comm_capacity: EXEC_COMM_MAP_MAX_ENTRIES as usize,
            info_capacity: PROC_INFO_MAP_MAX_ENTRIES as usize,
            log_every: NonZeroU64::new(PACKET_LOG_INTERVAL).unwrap_or(NonZeroU64::MIN),
            poll_interval: Duration::from_secs(1),
            trace_buffer: 1024,
            seed: 0,
            format: OutputFormat::Tsv,
            watch: false,
        }
    }
}

impl From<SimulateArgs> for SimulationOptions {
    fn from(a: SimulateArgs) -> Self {
        Self {
            workers: a.workers,
            events_per_worker: a.events,
            // Validators reject zero.
            threshold: NonZeroU32::new(a.threshold).unwrap_or(NonZeroU32::MIN),
            pid_range: a.pid_range,
            pid_capacity: a.tables.pid_capacity,
            comm_capacity: a.tables.comm_capacity,
            info_capacity: a.tables.info_capacity,
            log_every: NonZeroU64::new(a.log_every).unwrap_or(NonZeroU64::MIN),
            poll_interval: Duration::from_secs_f64(a.poll_interval),
            trace_buffer: a.trace_buffer,
            seed: a.seed,
            format: a.format,
            watch: a.watch,
        }
    }
}

impl Cli {
    /// Resolve the subcommand into run options. `None` when no subcommand
    /// was given, in which case the caller prints help.
    pub fn resolve(self) -> Option<SimulationOptions> {
        match self.command {
            Some(Command::Simulate(args)) => Some(args.into()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    fn resolved(args: &[&str]) -> SimulationOptions {
        parse(args).unwrap().resolve().unwrap()
    }

    // UT-9.1: No arguments -> nothing to run
    #[test]
    fn ut_no_arguments() {
        assert!(parse(&["evtally"]).unwrap().resolve().is_none());
    }

    // UT-9.2: Simulate defaults
    #[test]
    fn ut_simulate_defaults() {
        let opts = resolved(&["evtally", "simulate"]);
        assert_eq!(opts.workers, 4);
        assert_eq!(opts.events_per_worker, 100_000);
        assert_eq!(opts.threshold.get(), 10_000);
        assert_eq!(opts.log_every.get(), 100);
        assert_eq!(opts.pid_capacity, 8192);
        assert_eq!(opts.comm_capacity, 1024);
        assert_eq!(opts.info_capacity, 8192);
        assert_eq!(opts.poll_interval, Duration::from_secs(1));
        assert_eq!(opts.format, OutputFormat::Tsv);
        assert!(!opts.watch);
    }

    // UT-9.3: Format values
    #[test]
    fn ut_format_values() {
        for (arg, want) in [
            ("tsv", OutputFormat::Tsv),
            ("json", OutputFormat::Json),
            ("pretty", OutputFormat::Pretty),
            ("prometheus", OutputFormat::Prometheus),
        ] {
            let opts = resolved(&["evtally", "simulate", "--format", arg]);
            assert_eq!(opts.format, want);
        }
    }

    // UT-9.4: Invalid format
    #[test]
    fn ut_invalid_format() {
        assert!(parse(&["evtally", "simulate", "--format", "xml"]).is_err());
    }

    // UT-9.5: Worker bounds
    #[test]
    fn ut_workers_bounds() {
        assert_eq!(resolved(&["evtally", "simulate", "--workers", "256"]).workers, 256);
        assert!(parse(&["evtally", "simulate", "--workers", "0"]).is_err());
        assert!(parse(&["evtally", "simulate", "--workers", "257"]).is_err());
    }

    // UT-9.6: Zero threshold rejected
    #[test]
    fn ut_threshold_zero() {
        assert!(parse(&["evtally", "simulate", "--threshold", "0"]).is_err());
        let opts = resolved(&["evtally", "simulate", "--threshold", "1"]);
        assert_eq!(opts.threshold.get(), 1);
    }

    // UT-9.7: Capacities
    #[test]
    fn ut_capacities() {
        let opts = resolved(&[
            "evtally",
            "simulate",
            "--pid-capacity",
            "16",
            "--comm-capacity",
            "8",
            "--info-capacity",
            "32",
        ]);
        assert_eq!(
            (opts.pid_capacity, opts.comm_capacity, opts.info_capacity),
            (16, 8, 32)
        );
        assert!(parse(&["evtally", "simulate", "--comm-capacity", "0"]).is_err());
    }

    // UT-9.8: Poll interval range
    #[test]
    fn ut_poll_interval_range() {
        let opts = resolved(&["evtally", "simulate", "--poll-interval", "0.5"]);
        assert_eq!(opts.poll_interval, Duration::from_millis(500));
        assert!(parse(&["evtally", "simulate", "--poll-interval", "0.05"]).is_err());
        assert!(parse(&["evtally", "simulate", "--poll-interval", "15"]).is_err());
    }

    // UT-9.9: Non-numeric values
    #[test]
    fn ut_not_a_number() {
        assert!(parse(&["evtally", "simulate", "--events", "many"]).is_err());
        assert!(parse(&["evtally", "simulate", "--log-every", "x"]).is_err());
        assert!(parse(&["evtally", "simulate", "--pid-range", "-1"]).is_err());
    }

    // UT-9.10: Seed and trace buffer
    #[test]
    fn ut_seed_and_trace_buffer() {
        let opts = resolved(&[
            "evtally",
            "simulate",
            "--seed",
            "42",
            "--trace-buffer",
            "8",
        ]);
        assert_eq!((opts.seed, opts.trace_buffer), (42, 8));
        assert!(parse(&["evtally", "simulate", "--trace-buffer", "0"]).is_err());
    }

    // UT-9.11: Watch flag
    #[test]
    fn ut_watch_flag() {
        let opts = resolved(&["evtally", "simulate", "--watch", "--format", "prometheus"]);
        assert!(opts.watch);
        assert_eq!(opts.format, OutputFormat::Prometheus);
    }
}
