//! Engine parameters: the recognized `rabit_*` set, environment pickup for
//! Hadoop-style launchers, and defaults matching the coordinator's.

use crate::error::{ArborError, Result};

/// Tuning and rendezvous parameters for one engine instance.
///
/// All values have defaults; override via [`set_param`](Self::set_param)
/// before [`Engine::init`](crate::Engine::init). Parameters must not be
/// mutated while a collective is in flight.
#[derive(Debug, Clone)]
pub struct ArborConfig {
    /// Coordinator host. The sentinel `"NULL"` selects single-node mode:
    /// no sockets are opened and the worker becomes rank 0 of a cohort of 1.
    pub tracker_uri: String,

    /// Coordinator TCP port.
    pub tracker_port: u16,

    /// Opaque task label passed to the coordinator.
    pub task_id: String,

    /// Expected cohort size; `None` until the coordinator announces it.
    pub world_size: Option<u32>,

    /// Derive task id / world size from the launcher environment.
    pub hadoop_mode: bool,

    /// Retry attempt index as reported by the launcher.
    pub num_trial: u32,

    /// Target size for each child link's ring buffer.
    pub reduce_buffer_bytes: usize,

    /// First port tried for the peer listening socket.
    pub slave_port: u16,

    /// Number of ports probed from `slave_port` before giving up.
    pub nport_trial: u16,

    /// Fraction of the global loop run per cooperative executor step.
    pub approx_run_step: f64,

    /// Fraction of the remaining loop run between status probes.
    pub approx_check_step: f64,

    /// Floor on the status-probe batch, as a fraction of the global loop.
    pub approx_check_min_step: f64,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            tracker_uri: "NULL".into(),
            tracker_port: 9000,
            task_id: "NULL".into(),
            world_size: None,
            hadoop_mode: false,
            num_trial: 0,
            reduce_buffer_bytes: 256 << 20, // 256 MiB
            slave_port: 9010,
            nport_trial: 1000,
            approx_run_step: 0.001,
            approx_check_step: 0.3,
            approx_check_min_step: 0.01,
        }
    }
}

impl ArborConfig {
    /// Set one recognized parameter by name. Unrecognized names are ignored
    /// so callers can forward a mixed parameter bag.
    ///
    /// `rabit_reduce_buffer` takes `<uint><unit>` with unit `B` (bytes),
    /// `K` (KiB), `M` (MiB) or `G` (GiB); characters after the unit are
    /// ignored, so `"256MB"` reads as 256 MiB.
    pub fn set_param(&mut self, name: &str, val: &str) -> Result<()> {
        match name {
            "rabit_tracker_uri" => self.tracker_uri = val.into(),
            "rabit_tracker_port" => {
                self.tracker_port = parse_num("rabit_tracker_port", val)?;
            }
            "rabit_task_id" => self.task_id = val.into(),
            "rabit_world_size" => {
                self.world_size = Some(parse_num("rabit_world_size", val)?);
            }
            "rabit_hadoop_mode" => {
                self.hadoop_mode = parse_num::<i64>("rabit_hadoop_mode", val)? != 0;
            }
            "rabit_num_trial" => {
                self.num_trial = parse_num("rabit_num_trial", val)?;
            }
            "rabit_reduce_buffer" => {
                self.reduce_buffer_bytes = parse_buffer_size(val)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Pick up launcher-provided settings from the environment, Hadoop
    /// streaming style. In Hadoop mode the task id and map count are
    /// mandatory; outside it they are applied only when present.
    pub fn apply_env(&mut self) -> Result<()> {
        let task_id = std::env::var("mapred_tip_id")
            .or_else(|_| std::env::var("mapreduce_task_id"))
            .ok();
        match task_id {
            Some(id) => {
                self.task_id = id;
                self.hadoop_mode = true;
            }
            None if self.hadoop_mode => return Err(ArborError::HadoopEnv("mapred_tip_id")),
            None => {}
        }
        if let Ok(attempt) = std::env::var("mapred_task_id") {
            if let Some(trial) = attempt.rsplit('_').next().and_then(|s| s.parse().ok()) {
                self.num_trial = trial;
            }
        }
        let num_task = std::env::var("mapred_map_tasks")
            .or_else(|_| std::env::var("mapreduce_job_maps"))
            .ok();
        match num_task {
            Some(n) => {
                self.world_size = Some(n.parse().map_err(|_| ArborError::InvalidParam {
                    name: "rabit_world_size",
                    value: n,
                    reason: "environment value is not an unsigned integer",
                })?);
            }
            None if self.hadoop_mode => return Err(ArborError::HadoopEnv("mapred_map_tasks")),
            None => {}
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, val: &str) -> Result<T> {
    val.parse().map_err(|_| ArborError::InvalidParam {
        name,
        value: val.into(),
        reason: "not a number",
    })
}

/// Parse `<uint><unit>` into bytes, unit one of `B`/`K`/`M`/`G`
/// (bytes, KiB, MiB, GiB).
fn parse_buffer_size(val: &str) -> Result<usize> {
    let invalid = |reason| ArborError::InvalidParam {
        name: "rabit_reduce_buffer",
        value: val.into(),
        reason,
    };
    let digits = val.len() - val.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Err(invalid("missing size digits"));
    }
    let amount: usize = val[..digits]
        .parse()
        .map_err(|_| invalid("size does not fit"))?;
    let shift: u32 = match val[digits..].chars().next() {
        Some('B') => 0,
        Some('K') => 10,
        Some('M') => 20,
        Some('G') => 30,
        _ => return Err(invalid("unit must be one of B, K, M, G")),
    };
    amount
        .checked_shl(shift)
        .filter(|n| *n >> shift == amount)
        .ok_or_else(|| invalid("size does not fit"))
}
