//! Host resource sampling from kernel counters
//!
//! Computes point-in-time CPU and memory utilization percentages:
//! - Memory: cgroup v2 current/max, then cgroup v1 usage/limit, then /proc/meminfo
//! - CPU: cumulative cgroup CPU-time counters (v2 usage_usec, v1 cpuacct.usage)
//!   with delta-over-time math, falling back to /proc/stat jiffy deltas
//!
//! Sources are tried in a fixed order and never mixed across calls. Every
//! failure path degrades to 0 with a logged diagnostic; nothing here errors
//! out to the sampling loop.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const CGROUP_V2_MEM_CURRENT: &str = "sys/fs/cgroup/memory.current";
const CGROUP_V2_MEM_MAX: &str = "sys/fs/cgroup/memory.max";
const CGROUP_V1_MEM_USAGE: &str = "sys/fs/cgroup/memory/memory.usage_in_bytes";
const CGROUP_V1_MEM_LIMIT: &str = "sys/fs/cgroup/memory/memory.limit_in_bytes";
const MEMINFO: &str = "proc/meminfo";
const CGROUP_V2_CPU_STAT: &str = "sys/fs/cgroup/cpu.stat";
const CGROUP_V1_CPU_USAGE: &str = "sys/fs/cgroup/cpuacct/cpuacct.usage";
const PROC_STAT: &str = "proc/stat";

/// Failure modes of a single counter source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("counter source unavailable: {0}")]
    Unavailable(&'static str),
    #[error("IO error reading {file}: {source}")]
    Io {
        file: &'static str,
        source: std::io::Error,
    },
    #[error("unparseable counter in {file}: {detail}")]
    Parse { file: &'static str, detail: String },
}

/// Memory counter sources, in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemorySource {
    CgroupV2,
    CgroupV1,
    Meminfo,
}

impl MemorySource {
    const ORDER: [MemorySource; 3] = [
        MemorySource::CgroupV2,
        MemorySource::CgroupV1,
        MemorySource::Meminfo,
    ];
}

/// Cumulative CPU-time counter sources, in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuSource {
    CgroupV2,
    CgroupV1,
}

impl CpuSource {
    const ORDER: [CpuSource; 2] = [CpuSource::CgroupV2, CpuSource::CgroupV1];
}

/// Previous counter reading needed for rate computation.
///
/// `None` means no baseline yet: the first sample after process start
/// reports 0 by definition. The baseline is tagged with the family (and
/// source, for cumulative counters) it came from so a source switch
/// between calls restarts the delta math instead of mixing counters.
#[derive(Debug, Clone, Copy)]
enum CpuBaseline {
    Cumulative {
        source: CpuSource,
        usage_nanos: u64,
        at: Instant,
    },
    Aggregate {
        used: u64,
        total: u64,
    },
}

/// Stateful sampler for the local host.
///
/// `root` is `/` in production; tests point it at a directory of fake
/// counter files.
pub struct Sampler {
    root: PathBuf,
    cpu_baseline: Option<CpuBaseline>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cpu_baseline: None,
        }
    }

    /// Memory utilization in [0,100], two decimals.
    ///
    /// Tries each source in order; a cgroup limit of "max", <= 0 or
    /// i64::MAX means the group is unbounded and the next source is
    /// consulted. Exhausting the list reports 0.
    pub async fn memory_percent(&self) -> f64 {
        for source in MemorySource::ORDER {
            match self.try_memory(source).await {
                Ok(percent) => return round2(percent),
                Err(e @ SourceError::Unavailable(_)) => {
                    debug!("memory source {source:?} skipped: {e}");
                }
                Err(e) => warn!("memory source {source:?} failed: {e}"),
            }
        }
        warn!("no usable memory counter source, reporting 0");
        0.0
    }

    async fn try_memory(&self, source: MemorySource) -> Result<f64, SourceError> {
        match source {
            MemorySource::CgroupV2 => {
                let used = parse_u64(&self.read(CGROUP_V2_MEM_CURRENT).await?, CGROUP_V2_MEM_CURRENT)?;
                let limit = parse_limit(&self.read(CGROUP_V2_MEM_MAX).await?)
                    .ok_or(SourceError::Unavailable("memory.max is unbounded"))?;
                Ok(used as f64 / limit as f64 * 100.0)
            }
            MemorySource::CgroupV1 => {
                let used = parse_u64(&self.read(CGROUP_V1_MEM_USAGE).await?, CGROUP_V1_MEM_USAGE)?;
                let limit = parse_limit(&self.read(CGROUP_V1_MEM_LIMIT).await?)
                    .ok_or(SourceError::Unavailable("memory.limit_in_bytes is unbounded"))?;
                Ok(used as f64 / limit as f64 * 100.0)
            }
            MemorySource::Meminfo => {
                let raw = self.read(MEMINFO).await?;
                let (total, available) = parse_meminfo(&raw).ok_or_else(|| SourceError::Parse {
                    file: MEMINFO,
                    detail: "MemTotal/MemAvailable missing".into(),
                })?;
                if total == 0 {
                    return Err(SourceError::Parse {
                        file: MEMINFO,
                        detail: "MemTotal is zero".into(),
                    });
                }
                Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
            }
        }
    }

    /// CPU utilization in [0,100], two decimals.
    ///
    /// The first call after start always yields 0: there is no baseline
    /// to compute a delta against.
    pub async fn cpu_percent(&mut self) -> f64 {
        for source in CpuSource::ORDER {
            match self.read_cumulative(source).await {
                Ok(usage_nanos) => return self.cumulative_cpu_percent(source, usage_nanos),
                Err(e @ SourceError::Unavailable(_)) => {
                    debug!("cpu source {source:?} skipped: {e}");
                }
                Err(e) => warn!("cpu source {source:?} failed: {e}"),
            }
        }
        self.aggregate_cpu_percent().await
    }

    async fn read_cumulative(&self, source: CpuSource) -> Result<u64, SourceError> {
        match source {
            CpuSource::CgroupV2 => {
                let raw = self.read(CGROUP_V2_CPU_STAT).await?;
                let micros = parse_cpu_stat_usage(&raw).ok_or_else(|| SourceError::Parse {
                    file: CGROUP_V2_CPU_STAT,
                    detail: "usage_usec missing".into(),
                })?;
                Ok(micros.saturating_mul(1_000))
            }
            CpuSource::CgroupV1 => {
                let raw = self.read(CGROUP_V1_CPU_USAGE).await?;
                parse_u64(&raw, CGROUP_V1_CPU_USAGE)
            }
        }
    }

    fn cumulative_cpu_percent(&mut self, source: CpuSource, usage_nanos: u64) -> f64 {
        let now = Instant::now();
        let percent = match self.cpu_baseline {
            Some(CpuBaseline::Cumulative {
                source: prev,
                usage_nanos: last,
                at,
            }) if prev == source => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    cumulative_percent(usage_nanos.saturating_sub(last), elapsed)
                } else {
                    0.0
                }
            }
            // pas de baseline comparable: premier échantillon à 0
            _ => 0.0,
        };
        self.cpu_baseline = Some(CpuBaseline::Cumulative {
            source,
            usage_nanos,
            at: now,
        });
        round2(percent.clamp(0.0, 100.0))
    }

    async fn aggregate_cpu_percent(&mut self) -> f64 {
        let raw = match self.read(PROC_STAT).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("no usable cpu counter source, reporting 0: {e}");
                return 0.0;
            }
        };
        let Some((total, idle)) = parse_proc_stat(&raw) else {
            warn!("unparseable {PROC_STAT}, reporting 0");
            return 0.0;
        };
        let used = total.saturating_sub(idle);
        let percent = match self.cpu_baseline {
            Some(CpuBaseline::Aggregate {
                used: last_used,
                total: last_total,
            }) => {
                let delta_total = total.saturating_sub(last_total);
                if delta_total > 0 {
                    aggregate_percent(used.saturating_sub(last_used), delta_total)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        self.cpu_baseline = Some(CpuBaseline::Aggregate { used, total });
        round2(percent.clamp(0.0, 100.0))
    }

    async fn read(&self, rel: &'static str) -> Result<String, SourceError> {
        match fs::read_to_string(self.root.join(rel)).await {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::Unavailable(rel)),
            Err(e) => Err(SourceError::Io { file: rel, source: e }),
        }
    }
}

fn parse_u64(raw: &str, file: &'static str) -> Result<u64, SourceError> {
    raw.trim().parse().map_err(|_| SourceError::Parse {
        file,
        detail: raw.trim().to_string(),
    })
}

/// Cgroup memory limits: "max", <= 0, i64::MAX ou toute valeur hors plage
/// signifient "pas de limite" -> source inutilisable.
fn parse_limit(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed == "max" {
        return None;
    }
    let value: i64 = trimmed.parse().ok()?;
    if value <= 0 || value == i64::MAX {
        return None;
    }
    Some(value as u64)
}

fn parse_meminfo(raw: &str) -> Option<(u64, u64)> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.split_whitespace().next()?.parse::<u64>().ok();
        }
    }
    Some((total_kb? * 1024, available_kb? * 1024))
}

fn parse_cpu_stat_usage(raw: &str) -> Option<u64> {
    raw.lines()
        .find_map(|line| line.strip_prefix("usage_usec"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// First "cpu" line of /proc/stat -> (total jiffies, idle jiffies).
fn parse_proc_stat(raw: &str) -> Option<(u64, u64)> {
    let line = raw.lines().next()?;
    let mut columns = line.split_whitespace();
    if columns.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = columns.map(|v| v.parse().ok()).collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let total = values.iter().sum();
    let idle = values[3];
    Some((total, idle))
}

fn cumulative_percent(delta_nanos: u64, elapsed_secs: f64) -> f64 {
    (delta_nanos as f64 / 1e9) / elapsed_secs * 100.0
}

fn aggregate_percent(delta_used: u64, delta_total: u64) -> f64 {
    delta_used as f64 / delta_total as f64 * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
