//! export.rs
//! CSV export of telemetry snapshots.
//!
//! Layout:
//! - Metadata comment lines (`# PID-Simulator CSV Export`, timestamp, timestep, buffer size, window).
//! - Header `t,SP,PV,u,PV_clean`, taken from the serde names of [`SimulationSample`].
//! - One row per sample; t/SP/PV/PV_clean rounded to 3 decimals, u to 6.

use std::{
    fmt,
    fs::{File, create_dir_all},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use csv::Writer;
use log::info;

use crate::error::ExportError;
use crate::protocol::SimulationSample;

/// Which slice of history a snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportWindow {
    Full,
    Seconds(f64),
}

impl fmt::Display for ExportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportWindow::Full => f.write_str("full"),
            ExportWindow::Seconds(s) => write!(f, "last {}s", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportMeta {
    pub timestep: f64,
    pub buffer_size: usize,
    pub window: ExportWindow,
}

/// Write `samples` as CSV into `out`. Returns the number of data rows.
pub fn write_csv<W: Write>(
    samples: &[SimulationSample],
    meta: &ExportMeta,
    mut out: W,
) -> Result<usize, ExportError> {
    if samples.is_empty() {
        return Err(ExportError::Empty);
    }

    writeln!(out, "# PID-Simulator CSV Export")?;
    writeln!(out, "# timestamp: {}", epoch_millis())?;
    writeln!(out, "# timestep: {}s", meta.timestep)?;
    writeln!(out, "# bufferSize: {}", meta.buffer_size)?;
    writeln!(out, "# window: {}", meta.window)?;

    let mut wtr = Writer::from_writer(out);
    for s in samples {
        wtr.serialize(rounded(s))?;
    }
    wtr.flush()?;
    Ok(samples.len())
}

fn rounded(s: &SimulationSample) -> SimulationSample {
    let round = |value: f64, decimals: i32| {
        let scale = 10f64.powi(decimals);
        (value * scale).round() / scale
    };
    SimulationSample {
        t: round(s.t, 3),
        sp: round(s.sp, 3),
        pv: round(s.pv, 3),
        u: round(s.u, 6),
        pv_clean: round(s.pv_clean, 3),
    }
}

/// Export into `dir/pid_sim_<epoch_ms>.csv`, creating `dir` if needed.
pub fn export_to_dir(
    dir: impl AsRef<Path>,
    samples: &[SimulationSample],
    meta: &ExportMeta,
) -> Result<PathBuf, ExportError> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let path = dir.join(format!("pid_sim_{}.csv", epoch_millis()));
    let file = File::create(&path)?;
    let rows = write_csv(samples, meta, BufWriter::new(file))?;
    info!("Exported {} samples to {:?}", rows, path);
    Ok(path)
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
