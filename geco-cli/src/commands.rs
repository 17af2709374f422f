//! Command execution.

use crate::Commands;
use colored::Colorize;
use geco_client::{Client, ClientError, Connector};
use geco_registers::{
    Access, Block, RawDump, RegisterDefinition, RegisterError, RegisterMap, ValueKind, Values,
};
use serde_json::json;
use std::time::Duration;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a bus command and returns the formatted output.
pub async fn execute<C: Connector>(client: &Client<C>, cmd: Commands, as_json: bool) -> CommandResult {
    match cmd {
        Commands::Status => read_values(client, Block::Status, as_json).await,

        Commands::Config => read_values(client, Block::Config, as_json).await,

        Commands::Set { name, value } => {
            let def = config_register(client.map(), &name)?;
            let value = def.parse_value(&value)?;
            // Validate before touching the bus.
            client.validate_write(&name, &value)?;

            client.read_config().await?;
            let ack = client.write_register(&name, value).await?;

            if as_json {
                return Ok(serde_json::to_string_pretty(&ack)?);
            }
            Ok(format!(
                "{} {}: {} -> {}",
                "Updated".green(),
                ack.register.cyan(),
                ack.previous,
                with_unit(&ack.value.to_string(), def.unit).yellow()
            ))
        }

        Commands::Dump { block } => {
            let block = Block::from(block);
            let reading = client.read_block(block).await?;
            let dump = client.map().raw_dump(block, &reading.raw);
            if as_json {
                return Ok(serde_json::to_string_pretty(&dump)?);
            }
            Ok(format_dump(&dump))
        }

        // Handled directly in main.rs
        Commands::Registers { .. } | Commands::Listen { .. } => unreachable!(),
    }
}

async fn read_values<C: Connector>(client: &Client<C>, block: Block, as_json: bool) -> CommandResult {
    let reading = client.read_block(block).await?;
    if as_json {
        return Ok(serde_json::to_string_pretty(&reading)?);
    }
    Ok(format_values(client.map(), block, &reading.values))
}

/// Prints observations until interrupted or `count` have been seen.
pub async fn listen<C: Connector>(
    client: &Client<C>,
    count: Option<usize>,
    as_json: bool,
) -> Result<(), ClientError> {
    let mut seen = 0;
    loop {
        tokio::select! {
            result = client.next_observation(Duration::from_secs(60)) => {
                let Some(observation) = result? else {
                    eprintln!("{}", "No traffic for 60s".dimmed());
                    continue;
                };
                if as_json {
                    println!("{}", json!(observation));
                } else {
                    println!(
                        "{} {:?} registers {}+{}",
                        observation.received_at.format("%H:%M:%S").to_string().dimmed(),
                        observation.kind,
                        observation.first_register,
                        observation.raw.len() / 2
                    );
                    println!(
                        "{}",
                        format_values(client.map(), observation.block, &observation.values)
                    );
                }
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                return Ok(());
            }
        }
    }
}

/// Lists register definitions.
pub fn list_registers(block: Option<Block>, as_json: bool) -> CommandResult {
    let map = RegisterMap::pcwu();
    let blocks: Vec<Block> = match block {
        Some(block) => vec![block],
        None => Block::ALL.to_vec(),
    };

    if as_json {
        let registers: Vec<_> = blocks
            .iter()
            .flat_map(|&block| map.definitions(block))
            .map(|def| {
                json!({
                    "name": def.name,
                    "block": def.block,
                    "register": def.block.register_at(def.offset),
                    "offset": def.offset,
                    "width": def.width,
                    "kind": kind_label(&def.kind),
                    "access": def.access,
                    "range": def.range,
                    "unit": def.unit,
                    "description": def.description,
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&registers)?);
    }

    let mut output = format!("{} {}\n", map.model().bold(), format!("v{}", map.version()).dimmed());
    for block in blocks {
        output.push_str(&format!("\n{}\n", format!("{} block", block).bold()));
        for def in map.definitions(block) {
            let access = match def.access {
                Access::ReadWrite => "rw".green(),
                Access::ReadOnly => "ro".dimmed(),
            };
            let range = def
                .range
                .map(|r| format!(" [{}..{}]", r.min, r.max))
                .unwrap_or_default();
            output.push_str(&format!(
                "  {:>3} {} {:<28} {}{}\n",
                def.block.register_at(def.offset),
                access,
                def.name.cyan(),
                kind_label(&def.kind),
                range.dimmed()
            ));
        }
    }
    Ok(output)
}

fn config_register(
    map: &RegisterMap,
    name: &str,
) -> Result<&'static RegisterDefinition, RegisterError> {
    if map.get(Block::Status, name).is_some() {
        return Err(RegisterError::ReadOnly {
            name: name.to_string(),
        });
    }
    map.get(Block::Config, name)
        .ok_or_else(|| RegisterError::UnknownRegister {
            name: name.to_string(),
        })
}

/// Formats decoded values in map order.
fn format_values(map: &RegisterMap, block: Block, values: &Values) -> String {
    let mut output = String::new();
    for def in map.definitions(block) {
        if let Some(value) = values.get(def.name) {
            output.push_str(&format!(
                "  {:<28} {}\n",
                def.name.cyan(),
                with_unit(&value.to_string(), def.unit)
            ));
        }
    }
    if output.is_empty() {
        return "No registers decoded".yellow().to_string();
    }
    output.pop();
    output
}

fn format_dump(dump: &RawDump) -> String {
    let mut output = format!("{}\n", format!("{} block", dump.block).bold());
    for (register, word) in &dump.registers {
        output.push_str(&format!("  {:>3}  {:04x}  {:>5}\n", register, word, word));
    }
    output.push_str(&format!("{}: {}", "hex".dimmed(), dump.hex));
    output
}

fn with_unit(value: &str, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{value} {unit}"),
        None => value.to_string(),
    }
}

fn kind_label(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Scaled { divisor } => format!("scaled/{divisor}"),
        ValueKind::Unsigned => "unsigned".to_string(),
        ValueKind::Offset(offset) => format!("unsigned+{offset}"),
        ValueKind::Bool => "bool".to_string(),
        ValueKind::Enum(options) => options
            .iter()
            .map(|o| o.label)
            .collect::<Vec<_>>()
            .join("|"),
        ValueKind::Flag { mask } => format!("flag {mask:#06x}"),
        ValueKind::TimeProgram => "hours".to_string(),
    }
}
