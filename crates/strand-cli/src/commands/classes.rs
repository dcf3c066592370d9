//! Class listing and information command.

#![allow(clippy::print_literal)] // literal table headers

use clap::Args;
use strand_core::{ClassCategory, Direction, Graph, GraphConfig};

const CATEGORIES: [ClassCategory; 6] = [
    ClassCategory::Source,
    ClassCategory::Processor,
    ClassCategory::Analysis,
    ClassCategory::Control,
    ClassCategory::Midi,
    ClassCategory::Debug,
];

#[derive(Args)]
pub struct ClassesArgs {
    /// Show the variables of a specific class
    #[arg(value_name = "CLASS")]
    class: Option<String>,
}

pub fn run(args: ClassesArgs) -> anyhow::Result<()> {
    let registry = strand_units::builtin_registry();

    if let Some(label) = &args.class {
        let descriptor = registry
            .get(label)
            .ok_or_else(|| anyhow::anyhow!("Unknown class: {}", label))?;

        println!("{}", descriptor.label);
        println!("{}", "=".repeat(descriptor.label.len()));
        println!();
        println!("{}", descriptor.description);
        println!("Category: {}", descriptor.category.name());
        println!();

        // Variables are declared by the factory, so build one with default
        // arguments to list them.
        let mut graph = Graph::new(registry.clone(), GraphConfig::default());
        let id = graph.allocate_instance(descriptor.label, None, &strand_core::Args::new())?;
        let Some(instance) = graph.instance(id) else {
            anyhow::bail!("instance of '{}' vanished", label);
        };

        println!("Variables:");
        println!();
        println!("  {:12}  {:4}  {}", "Name", "Dir", "Type");
        println!("  {:12}  {:4}  {}", "----", "---", "----");
        for (_, var) in instance.vars().iter() {
            let dir = match var.direction() {
                Direction::In => "in",
                Direction::Out => "out",
            };
            println!("  {:12}  {:4}  {}", var.label(), dir, var.var_type());
        }
        if !instance.exec_enabled() {
            println!();
            println!("Not executed per cycle; reacts to incoming values only.");
        }
        graph.unload();
    } else {
        println!("Available Classes");
        println!("=================");

        for category in CATEGORIES {
            let classes = registry.classes_in_category(category);
            if classes.is_empty() {
                continue;
            }
            println!();
            println!("{}:", category.name());
            for class in classes {
                println!("  {:12} - {}", class.label, class.description);
            }
        }

        println!();
        println!("Use 'strand classes <name>' for its variables.");
    }

    Ok(())
}
