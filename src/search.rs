use anyhow::Result;

use code_harness_core::models::AccessPrincipal;
use code_harness_core::search::SearchOptions;

use crate::engine::Engine;

pub async fn run_search(
    engine: &Engine,
    principal: &AccessPrincipal,
    query: &str,
    repos: Vec<String>,
    options: SearchOptions,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let repo_filter = if repos.is_empty() { None } else { Some(repos) };
    let results = engine.search(query, repo_filter, principal, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{}. [{:.4}] {}/{} ({})",
            i + 1,
            result.score,
            chunk.repo_id,
            chunk.source_path,
            chunk.span
        );
        match &chunk.symbol {
            Some(symbol) => println!("    {}: {}", chunk.kind, symbol),
            None => println!("    {}", chunk.kind),
        }
        println!("    match: {}  access: {}", result.match_type, chunk.access_group);
        println!(
            "    excerpt: \"{}\"",
            chunk.snippet(160).replace('\n', " ").trim()
        );
        println!("    id: {}", result.chunk_id);
        println!();
    }

    Ok(())
}
