//! Program validation command.

use std::path::PathBuf;

use clap::Args;

use super::common::{load_network, load_program, print_issues};

#[derive(Args)]
pub struct CheckArgs {
    /// Program name or path (TOML)
    program: String,

    /// Network roster (TOML) to check remote connections against
    #[arg(short, long)]
    network: Option<PathBuf>,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let (path, program) = load_program(&args.program)?;
    let network = load_network(args.network.as_deref(), &program)?;
    let registry = strand_units::builtin_registry();

    let mut issues = program.validate(&registry);
    if let Some(net) = &network {
        issues.extend(net.validate());
        issues.extend(program.validate_remotes(net));
    }

    println!("{} ({})", program.name, path.display());
    if !issues.is_empty() {
        print_issues(&issues);
        anyhow::bail!("{} problem(s) found", issues.len());
    }

    println!(
        "  {} instance(s), {} audio connection(s), {} callback(s), {} remote connection(s)",
        program.instances.len(),
        program.audio.len(),
        program.callbacks.len(),
        program.remote.len()
    );
    match &network {
        Some(net) => println!("  network: {} node(s), local '{}'", net.nodes.len(), net.local),
        None if !program.remote.is_empty() => {
            println!("  network: none given; remote connections were not checked against a roster");
        }
        None => {}
    }
    println!("OK");
    Ok(())
}
