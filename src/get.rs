use anyhow::Result;

use code_harness_core::models::AccessPrincipal;

use crate::engine::Engine;

/// CLI entry point: fetch one chunk and print it to stdout.
pub async fn run_get(engine: &Engine, principal: &AccessPrincipal, id: &str, json: bool) -> Result<()> {
    let chunk = engine.get(id, principal).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunk)?);
        return Ok(());
    }

    println!("--- Chunk ---");
    println!("id:           {}", chunk.id);
    println!("repository:   {}", chunk.repo_id);
    println!("path:         {}", chunk.source_path);
    println!("kind:         {}", chunk.kind);
    println!("span:         {}", chunk.span);
    if let Some(ref symbol) = chunk.symbol {
        println!("symbol:       {}", symbol);
    }
    if let Some(ref language) = chunk.language {
        println!("language:     {}", language);
    }
    println!("access:       {}", chunk.access_group);
    println!("content_hash: {}", chunk.content_hash);
    println!();

    println!("--- Content ---");
    println!("{}", chunk.content);

    Ok(())
}
