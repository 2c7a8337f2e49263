use cli_table::format::Separator;
use cli_table::{Cell, CellStruct, Table, print_stdout};

use crate::records::Cluster;

/// How `list` renders its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    /// Fixed-width human-readable table.
    #[default]
    Cli,
    /// One JSON document on stdout.
    Json,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            OutputMode::Cli => "cli",
            OutputMode::Json => "json",
        })
    }
}

pub fn print_clusters(clusters: &[Cluster], mode: OutputMode) {
    match mode {
        OutputMode::Cli => {
            print_table(CLUSTER_COLUMNS, clusters.iter().map(cluster_row).collect());
        }
        OutputMode::Json => match serde_json::to_string_pretty(clusters) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Cannot serialize clusters: {e:?}"),
        },
    }
}

/// A fixed-width output column: header plus the width the value is clipped
/// to.
pub struct Column {
    pub header: &'static str,
    pub width: usize,
}

pub const CLUSTER_COLUMNS: &[Column] = &[
    Column {
        header: "Cluster",
        width: 16,
    },
    Column {
        header: "ControlHost",
        width: 16,
    },
    Column {
        header: "ControlPort",
        width: 11,
    },
    Column {
        header: "Fairshare",
        width: 9,
    },
    Column {
        header: "MaxJobs",
        width: 8,
    },
    Column {
        header: "MaxNodes",
        width: 8,
    },
    Column {
        header: "MaxWall",
        width: 8,
    },
    Column {
        header: "MaxCPUSecs",
        width: 10,
    },
];

/// Clips a value to the column width, ending it with an ellipsis when it
/// does not fit.
pub fn truncate_cell(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut clipped: String = value.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

/// Prints one table: a single header row followed by the value rows, each
/// value clipped to its column's width.
pub fn print_table(columns: &[Column], rows: Vec<Vec<String>>) {
    let header: Vec<CellStruct> = columns.iter().map(|c| c.header.cell()).collect();
    let rows: Vec<Vec<CellStruct>> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(columns)
                .map(|(value, column)| truncate_cell(&value, column.width).cell())
                .collect()
        })
        .collect();
    let table = rows
        .table()
        .separator(
            Separator::builder()
                .title(Some(Default::default()))
                .column(Some(Default::default()))
                .build(),
        )
        .title(header);
    if let Err(e) = print_stdout(table) {
        log::error!("Cannot print table to stdout: {e:?}");
    }
}

pub fn cluster_row(cluster: &Cluster) -> Vec<String> {
    vec![
        cluster.name.clone(),
        cluster.control_host.clone().unwrap_or_default(),
        cluster
            .control_port
            .map(|p| p.to_string())
            .unwrap_or_default(),
        cluster.fairshare.to_string(),
        cluster.limits.max_jobs.to_string(),
        cluster.limits.max_nodes_per_job.to_string(),
        cluster.limits.max_wall_minutes.to_string(),
        cluster.limits.max_cpu_secs_per_job.to_string(),
    ]
}
