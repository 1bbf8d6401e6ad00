//! Writes TypeScript declarations for the request/response shapes shared with
//! the web app.

use std::{env, fs, path::PathBuf};

use db::models::query_descriptor::{Condition, FilterOperator, OrderClause, QueryDescriptor};
use services::services::data_access::{FailureKind, ResultEnvelope};
use ts_rs::TS;

fn main() -> anyhow::Result<()> {
    let out = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("shared/types.ts"));

    let declarations = [
        FilterOperator::decl(),
        Condition::decl(),
        OrderClause::decl(),
        QueryDescriptor::decl(),
        FailureKind::decl(),
        ResultEnvelope::<serde_json::Value>::decl(),
    ];

    let mut contents = String::from("// This file was generated by `generate-types`. Do not edit.\n\n");
    for decl in declarations {
        contents.push_str("export ");
        contents.push_str(&decl);
        contents.push_str("\n\n");
    }

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out, contents)?;
    println!("Wrote {}", out.display());
    Ok(())
}
