use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use acctq::admin::output::{OutputMode, print_clusters};
use acctq::admin::{AdminController, AdminMode, Confirm, StdinConfirm};
use acctq::cache::AssocCache;
use acctq::common::setup::setup_logging;
use acctq::store::file::FileStore;

#[derive(Parser)]
#[command(author, about, version(acctq::ACCTQ_VERSION))]
struct RootOptions {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser)]
struct CommonOpts {
    /// Path of the accounting store file
    #[arg(long, env = "ACCTQ_STORE", default_value = "acctq.json", global = true)]
    store: PathBuf,

    /// Name of the local cluster; defaults to the hostname
    #[arg(long, env = "ACCTQ_CLUSTER", global = true)]
    cluster: Option<String>,

    /// Apply each change right away instead of staging it for a final commit
    #[arg(long, short('i'), global = true)]
    immediate: bool,

    /// How to display the output
    #[arg(long, value_enum, default_value_t = OutputMode::Cli, global = true)]
    output_mode: OutputMode,

    /// Include debug messages in the log output
    #[arg(long, short('v'), global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Create a new record
    Add {
        #[clap(subcommand)]
        entity: EntityCommand,
    },
    /// Display existing records
    List {
        #[clap(subcommand)]
        entity: EntityCommand,
    },
    /// Change fields of existing records
    Modify {
        #[clap(subcommand)]
        entity: EntityCommand,
    },
    /// Remove records and everything that hangs off them
    Delete {
        #[clap(subcommand)]
        entity: EntityCommand,
    },
}

#[derive(Subcommand)]
enum EntityCommand {
    /// Operate on clusters and their root associations
    Cluster {
        /// KEY=value tokens, optionally split into Where and Set clauses
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn local_cluster(opts: &CommonOpts) -> String {
    match &opts.cluster {
        Some(name) => name.clone(),
        None => gethostname::gethostname().to_string_lossy().into_owned(),
    }
}

fn run(root: RootOptions) -> acctq::Result<()> {
    let store = FileStore::open(&root.common.store)?;
    let cache = AssocCache::new(&local_cluster(&root.common));
    cache.init(&store)?;

    let mode = if root.common.immediate {
        AdminMode::Immediate
    } else {
        AdminMode::Staged
    };
    let mut admin = AdminController::new(&store, &cache, mode, Box::new(StdinConfirm));

    match root.subcmd {
        SubCommand::Add {
            entity: EntityCommand::Cluster { args },
        } => admin.add_cluster(&args)?,
        SubCommand::List {
            entity: EntityCommand::Cluster { args },
        } => {
            let clusters = admin.list_clusters(&args)?;
            print_clusters(&clusters, root.common.output_mode);
        }
        SubCommand::Modify {
            entity: EntityCommand::Cluster { args },
        } => admin.modify_clusters(&args)?,
        SubCommand::Delete {
            entity: EntityCommand::Cluster { args },
        } => admin.delete_clusters(&args)?,
    }

    if admin.has_staged_changes() {
        if StdinConfirm.confirm("Would you like to commit changes?") {
            admin.commit()?;
        } else {
            admin.rollback()?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let root = RootOptions::parse();
    setup_logging(root.common.verbose);

    match run(root) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
