//! testf - Command-line front end for running native test suites

use clap::{Parser, Subcommand};
use std::io::Write;
use std::time::Duration;
use testframework::commands::*;
use testframework::signal::InterruptFlag;
use testframework::ui::CliUI;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testf")]
#[command(about = "Concurrent test runner", long_about = None)]
struct Cli {
    /// Suite directory (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    directory: Option<String>,

    /// Suite manifest to use instead of the one in the suite directory
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected tests
    Run {
        /// Number of tests to run at once (0 = number of CPUs)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Default per-test timeout in seconds
        #[arg(short = 't', long)]
        timeout: Option<u64>,

        /// Seconds a test may take to report after its timeout
        #[arg(long)]
        grace: Option<u64>,

        /// Run every test this many times
        #[arg(short = 'r', long, default_value = "1")]
        repeat: usize,

        /// Keep repeating a test after it failed
        #[arg(short = 'k', long = "continue")]
        kontinue: bool,

        /// Stop the whole run at the first failure
        #[arg(short = 'a', long)]
        abort_fast: bool,

        /// Show test output as it is produced
        #[arg(short = 'v', long)]
        verbose: bool,

        /// Write results to this directory instead of a timestamped one
        #[arg(short = 'o', long)]
        output_dir: Option<String>,

        /// Run tests in this directory, moving what they leave behind into
        /// their results directory afterwards
        #[arg(short = 'd', long)]
        run_dir: Option<String>,

        /// Only check the selection and configuration
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Print the configuration values the selected tests require
        #[arg(long)]
        print_config: bool,

        /// Tests or groups to run; prefix with '!' to exclude
        filters: Vec<String>,
    },

    /// List the tests matching the given filters
    List {
        /// Show each test's description
        #[arg(short = 'v', long)]
        verbose: bool,

        /// Annotate tests with the groups that include them
        #[arg(short = 'g', long)]
        groups: bool,

        filters: Vec<String>,
    },

    /// List the named test groups
    Groups {
        /// Show each group's tokens
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Show the results of a previous run
    Load {
        /// Results directory to load (defaults to the newest)
        #[arg(long)]
        from: Option<String>,

        /// Only tests that failed
        #[arg(short = 'F', long)]
        only_failed: bool,

        /// List the files each test left behind
        #[arg(short = 'T', long)]
        tree: bool,

        /// Only list test names
        #[arg(short = 'l', long)]
        list: bool,

        /// Dump each test's output
        #[arg(short = 'v', long)]
        verbose: bool,

        filters: Vec<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("TESTF_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: Cli, ui: &mut CliUI) -> testframework::Result<i32> {
    match cli.command {
        Commands::Run {
            jobs,
            timeout,
            grace,
            repeat,
            kontinue,
            abort_fast,
            verbose,
            output_dir,
            run_dir,
            dry_run,
            print_config,
            filters,
        } => {
            let mut cmd = RunCommand::new(cli.directory);
            cmd.config_path = cli.config;
            cmd.filters = filters;
            cmd.jobs = jobs;
            cmd.timeout = timeout;
            cmd.grace = grace.map(Duration::from_secs);
            cmd.repeat = repeat;
            cmd.kontinue = kontinue;
            cmd.abort_fast = abort_fast;
            cmd.verbose = verbose;
            cmd.output_dir = output_dir;
            cmd.run_dir = run_dir;
            cmd.dry_run = dry_run;
            cmd.print_config = print_config;
            cmd.interrupt = InterruptFlag::install()?;
            cmd.execute(ui)
        }
        Commands::List {
            verbose,
            groups,
            filters,
        } => {
            let mut cmd = ListTestsCommand::new(cli.directory);
            cmd.config_path = cli.config;
            cmd.filters = filters;
            cmd.verbose = verbose;
            cmd.show_groups = groups;
            cmd.execute(ui)
        }
        Commands::Groups { verbose } => {
            let mut cmd = GroupsCommand::new(cli.directory);
            cmd.config_path = cli.config;
            cmd.verbose = verbose;
            cmd.execute(ui)
        }
        Commands::Load {
            from,
            only_failed,
            tree,
            list,
            verbose,
            filters,
        } => {
            let mut cmd = LoadCommand::new(cli.directory);
            cmd.config_path = cli.config;
            cmd.from = from;
            cmd.only_failed = only_failed;
            cmd.tree = tree;
            cmd.list = list;
            cmd.verbose = verbose;
            cmd.filters = filters;
            cmd.execute(ui)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let mut ui = CliUI::new();

    match run(cli, &mut ui) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "Error: {}", e);
            std::process::exit(1);
        }
    }
}
