//! Interactive console against the orchestrator.

use anyhow::Result;
use uuid::Uuid;

use crate::runtime::Runtime;
use slovo_core::models::ToolStatus;

fn print_help(tools_enabled: bool) {
    println!(
        "\nCommands:\n\
         \x20 /help        Show commands\n\
         \x20 /exit        Exit\n\
         \x20 /quit        Exit\n\
         \x20 /new         New conversation id\n\
         \x20 /clear       Clear conversation context\n\
         \x20 /id          Show conversation id"
    );
    if tools_enabled {
        println!(
            "\x20 /tools [pending]      List tools\n\
             \x20 /tool import <path>   Import a local manifest\n\
             \x20 /tool openapi <url>   Ingest an OpenAPI descriptor\n\
             \x20 /tool approve <id>    Approve a pending tool\n\
             \x20 /tool revoke <id>     Revoke a tool\n\
             \x20 /tool logs <id> [n]   Show recent execution logs"
        );
    }
    println!();
}

async fn read_input(prompt: &str) -> Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;

    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<String, std::io::Error>(line)
    })
    .await?
    .map_err(Into::into)
}

pub async fn run_console(runtime: Runtime, mut conversation_id: String) -> Result<()> {
    let tools_enabled = runtime.tool_repo.is_some();

    println!("\nSlovo Orchestrator Console");
    println!("Type your message, or /help for commands.");
    println!("Conversation ID: {conversation_id}\n");

    loop {
        let line = match read_input("you> ").await {
            Ok(line) if line.is_empty() => {
                // EOF
                println!("\nExiting...");
                return Ok(());
            }
            Ok(line) => line.trim().to_string(),
            Err(_) => {
                println!("\nExiting...");
                return Ok(());
            }
        };

        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0].to_lowercase().as_str() {
                "/exit" | "/quit" => {
                    println!("Exiting...");
                    return Ok(());
                }
                "/help" => print_help(tools_enabled),
                "/new" => {
                    runtime.orchestrator.clear_conversation(&conversation_id).await;
                    conversation_id = Uuid::new_v4().to_string();
                    println!("New conversation ID: {conversation_id}");
                }
                "/clear" => {
                    runtime.orchestrator.clear_conversation(&conversation_id).await;
                    println!("Conversation context cleared.");
                }
                "/id" => println!("Conversation ID: {conversation_id}"),
                "/tools" if tools_enabled => {
                    list_tools(&runtime, parts.get(1).copied()).await;
                }
                "/tool" if tools_enabled => {
                    tool_command(&runtime, &parts[1..]).await;
                }
                _ => println!("Unknown command. Type /help for commands."),
            }
            continue;
        }

        let result = runtime
            .orchestrator
            .process_message(&line, &conversation_id)
            .await;

        println!("\nassistant>");
        println!("{}", result.response);
        if let Some(reasoning) = &result.reasoning {
            println!("\nreasoning: {reasoning}");
        }
        println!("confidence: {:.2}\n", result.confidence);
    }
}

async fn list_tools(runtime: &Runtime, filter: Option<&str>) {
    let Some(repo) = &runtime.tool_repo else {
        return;
    };

    let status = match filter {
        Some("pending") => Some(ToolStatus::PendingApproval),
        _ => None,
    };

    match repo.list_manifests(status).await {
        Ok(manifests) if manifests.is_empty() => println!("No tools."),
        Ok(manifests) => {
            for manifest in manifests {
                println!(
                    "{}  {} v{}  [{}]  {}",
                    manifest.id,
                    manifest.name,
                    manifest.version,
                    manifest.status.as_str(),
                    manifest.description
                );
            }
        }
        Err(e) => println!("Failed to list tools: {e}"),
    }
}

async fn tool_command(runtime: &Runtime, args: &[&str]) {
    let (Some(repo), Some(discovery)) = (&runtime.tool_repo, &runtime.discovery) else {
        return;
    };

    match args {
        ["import", path] => {
            match discovery.import_local_manifest(std::path::Path::new(path)).await {
                Ok(id) => println!("Imported manifest {id} (pending approval)."),
                Err(e) => println!("Import failed: {e}"),
            }
        }
        ["openapi", url] => match discovery.ingest_openapi_url(url).await {
            Ok(id) => println!("Ingested descriptor as manifest {id} (pending approval)."),
            Err(e) => println!("Ingestion failed: {e}"),
        },
        ["approve", id] => match id.parse::<Uuid>() {
            Ok(id) => match repo.transition_status(id, ToolStatus::Approved).await {
                Ok(manifest) => {
                    runtime.orchestrator.planner().register_tool(manifest.clone());
                    println!("Tool '{}' approved.", manifest.name);
                }
                Err(e) => println!("Approval failed: {e}"),
            },
            Err(_) => println!("Invalid tool id."),
        },
        ["revoke", id] => match id.parse::<Uuid>() {
            Ok(id) => match repo.transition_status(id, ToolStatus::Revoked).await {
                Ok(manifest) => {
                    runtime.orchestrator.planner().unregister_tool(&manifest.name);
                    if let Some(sandbox) = &runtime.sandbox {
                        if let Err(e) = sandbox.cleanup_tool_resources(id).await {
                            println!("Volume cleanup incomplete: {e}");
                        }
                    }
                    println!("Tool '{}' revoked.", manifest.name);
                }
                Err(e) => println!("Revocation failed: {e}"),
            },
            Err(_) => println!("Invalid tool id."),
        },
        ["logs", id, rest @ ..] => match id.parse::<Uuid>() {
            Ok(id) => {
                let limit = rest
                    .first()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(10usize);
                match repo.list_executions(id, limit).await {
                    Ok(logs) if logs.is_empty() => println!("No executions."),
                    Ok(logs) => {
                        for log in logs {
                            println!(
                                "{}  {}  {}ms  exit={:?}",
                                log.started_at.format("%Y-%m-%d %H:%M:%S"),
                                log.status.as_str(),
                                log.duration_ms.unwrap_or(0),
                                log.exit_code
                            );
                        }
                    }
                    Err(e) => println!("Failed to list executions: {e}"),
                }
            }
            Err(_) => println!("Invalid tool id."),
        },
        _ => println!("Unknown tool command. Type /help for commands."),
    }
}
