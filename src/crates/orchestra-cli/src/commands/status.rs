//! `orchestra status` — list sessions with derived status

use orchestra_core::config::load_config;
use orchestra_core::engine::session::extract_session_info;

use super::common;

pub fn status() -> anyhow::Result<()> {
    let config = load_config(None)?;
    let client = common::connect_store(&config)?;

    let contexts = client.list_contexts()?;

    let mut sessions = Vec::new();
    for context in contexts {
        let context_id = context
            .get("context_id")
            .or_else(|| context.get("id"))
            .map(common::json_id)
            .unwrap_or_default();
        if context_id.is_empty() {
            continue;
        }
        let Ok(turns) = client.get_turns(&context_id, 500) else { continue };

        let info = extract_session_info(&context_id, &turns);
        // Only contexts carrying a pipeline lifecycle are sessions
        if !info.pipeline_name.is_empty() {
            sessions.push(info);
        }
    }

    if sessions.is_empty() {
        println!("No sessions found.");
        client.close();
        return Ok(());
    }

    println!("{:<10} {:<25} {:<12} {:<6}", "ID", "Pipeline", "Status", "Turns");
    println!("{}", "-".repeat(55));
    for session in &sessions {
        let display = if session.display_id.is_empty() {
            session.context_id.chars().take(8).collect()
        } else {
            session.display_id.clone()
        };
        println!(
            "{display:<10} {:<25} {:<12} {:<6}",
            session.pipeline_name,
            session.status.as_str(),
            session.turn_count,
        );
    }

    client.close();
    Ok(())
}
