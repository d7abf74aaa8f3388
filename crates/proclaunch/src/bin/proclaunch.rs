//! Proclaunch CLI
//!
//! Usage:
//!   proclaunch
//!   proclaunch tree.yaml -a root:=/opt/app
//!   proclaunch tree.yaml --dry-run

use proclaunch::runtime::supervisor_dir;
use proclaunch::{LaunchArgs, Supervisor, SupervisorConfig, TreeFile, TreeSpec};

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let descriptor = args.resolve_descriptor(&supervisor_dir());
    log::info!("Loading descriptor: {}", descriptor.display());
    let tree_file = match TreeFile::from_file(&descriptor) {
        Ok(tf) => tf,
        Err(e) => {
            log::error!("Failed to load descriptor: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match tree_file.substitution_context(&args.arg_overrides()) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let spec = match TreeSpec::from_tree_file(&tree_file, &ctx) {
        Ok(spec) => spec,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!("Descriptor '{}' is valid", descriptor.display());
        println!("  Version: {}", tree_file.version);
        println!("  Args: {}", tree_file.args.len());
        println!("  Top-level processes: {}", spec.parents.len());
        println!("  Total processes: {}", spec.len());
        return;
    }

    let config = SupervisorConfig::from(&tree_file.settings);
    let supervisor = match Supervisor::setup(spec, config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    if args.dry_run {
        println!("{}", supervisor.plan().await);
        return;
    }

    match supervisor.run().await {
        Ok(_) => {
            log::info!("Proclaunch exiting");
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
