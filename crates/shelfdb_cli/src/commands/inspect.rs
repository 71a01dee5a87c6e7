//! Inspect command implementation.
//!
//! Reads the metadata and shard files directly, without taking lock
//! markers, so it is safe to run next to live instances.

use serde::Serialize;
use shelfdb_core::meta::Meta;
use shelfdb_core::shard::ShardStore;
use shelfdb_core::{IndexKind, ShardId, META_FILE};
use std::fs;
use std::path::Path;

/// Collection inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Collection path.
    pub path: String,
    /// Collection name.
    pub name: String,
    /// Number of live records.
    pub total: u64,
    /// Next id to assign.
    pub next: u64,
    /// Shard count.
    pub groups: u32,
    /// Indexed fields.
    pub index_fields: Vec<String>,
    /// Index representation.
    pub index_kind: String,
    /// Unique field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<String>,
    /// Positional field order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    /// Lock markers present at inspection time.
    pub markers: Vec<String>,
    /// Shard statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<Vec<ShardStats>>,
}

/// Statistics for a single shard.
#[derive(Debug, Serialize)]
pub struct ShardStats {
    /// Shard number.
    pub shard: u32,
    /// Number of stored records.
    pub records: usize,
    /// File size in bytes.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_shards: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let meta = Meta::load(&path.join(META_FILE))?
        .ok_or_else(|| format!("No collection found at {:?}", path))?;

    let mut markers: Vec<String> = fs::read_dir(path)?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".block"))
        .collect();
    markers.sort();

    let shards = if show_shards {
        let store = ShardStore::new(path, meta.groups, meta.headers.clone());
        let mut stats = Vec::with_capacity(meta.groups as usize);
        for n in 0..meta.groups {
            let shard = ShardId(n);
            stats.push(ShardStats {
                shard: n,
                records: store.ids(shard)?.len(),
                size: fs::metadata(store.path(shard)).map(|m| m.len()).unwrap_or(0),
            });
        }
        Some(stats)
    } else {
        None
    };

    let result = InspectResult {
        path: path.display().to_string(),
        name: meta.name,
        total: meta.total,
        next: meta.next,
        groups: meta.groups,
        index_fields: meta.index_fields,
        index_kind: match meta.index_kind {
            IndexKind::Heavy => "heavy".to_string(),
            IndexKind::Light => "light".to_string(),
        },
        unique: meta.unique,
        headers: meta.headers,
        markers,
        shards,
    };

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("ShelfDB Collection Inspection");
    println!("=============================");
    println!();
    println!("Path: {}", result.path);
    println!("Name: {}", result.name);
    println!();
    println!("Records:");
    println!("  Live:    {}", result.total);
    println!("  Next id: {}", result.next);
    println!();
    println!("Layout:");
    println!("  Groups:  {}", result.groups);
    println!(
        "  Indexes: [{}] ({})",
        result.index_fields.join(", "),
        result.index_kind
    );
    if let Some(unique) = &result.unique {
        println!("  Unique:  {}", unique);
    }
    if let Some(headers) = &result.headers {
        println!("  Headers: [{}]", headers.join(", "));
    }

    if !result.markers.is_empty() {
        println!();
        println!("Lock markers:");
        for marker in &result.markers {
            println!("  {}", marker);
        }
    }

    if let Some(shards) = &result.shards {
        println!();
        println!("Shards:");
        for shard in shards {
            println!(
                "  [data_{}] {} records, {}",
                shard.shard,
                shard.records,
                format_size(shard.size)
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
