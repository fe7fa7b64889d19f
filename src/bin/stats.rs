use kgmem::{Config, GraphFile, GraphStore};
use std::collections::BTreeMap;

/// Count occurrences of each label, most frequent first.
fn histogram<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    sorted
}

fn print_histogram(title: &str, rows: &[(&str, usize)]) {
    println!("{}:\n", title);
    println!("{:-<50}", "");
    println!("{:<40} {:>8}", "Type", "Count");
    println!("{:-<50}", "");
    for (label, count) in rows {
        println!("{:<40} {:>8}", label, count);
    }
    println!("{:-<50}\n", "");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    let file = GraphFile::new(config.file_path());
    let graph = tokio::task::spawn_blocking(move || file.load()).await??;
    let graph = GraphStore::from_graph(graph).into_graph();

    println!("\n=== kgmem Knowledge Graph Statistics ===\n");
    println!("Document: {}\n", config.file_path().display());

    if graph.is_empty() {
        println!("The graph is empty.");
        println!("\nCreate some entities to generate statistics.");
        return Ok(());
    }

    let observation_count: usize = graph.entities.iter().map(|e| e.observations.len()).sum();
    println!("Entities:     {}", graph.entities.len());
    println!("Relations:    {}", graph.relations.len());
    println!("Observations: {}\n", observation_count);

    print_histogram(
        "Entities by type",
        &histogram(graph.entities.iter().map(|e| e.entity_type.as_str())),
    );
    print_histogram(
        "Relations by type",
        &histogram(graph.relations.iter().map(|r| r.relation_type.as_str())),
    );

    Ok(())
}
