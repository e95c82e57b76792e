//! SQL functions the transform registers on the target connection.
//!
//! `remap_geom(blob, font_table, elem_table)` rewrites the element and font
//! ids embedded in a geometry stream. The table-name arguments name the
//! temp remap mirrors for the statement text; resolution reads the shared
//! in-memory tables those mirrors are flushed from, which hold identical
//! data between passes. `hex_to_id(text)` converts the hex id form used in
//! JSON projections back to the INTEGER column form.

use mgraft_error::{GraftError, Result};
use mgraft_types::{remap_stream, EcId};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::warn;

use crate::context::RemapContext;

/// Register `remap_geom` and `hex_to_id` on `conn`.
pub fn register_functions(conn: &Connection, ctx: &RemapContext) -> Result<()> {
    let store = ctx.shared();
    conn.create_scalar_function(
        "remap_geom",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |f| {
            let blob: Option<Vec<u8>> = f.get(0)?;
            let Some(blob) = blob else {
                return Ok(None);
            };
            let store = store.read();
            let remapped = remap_stream(
                &blob,
                |element| {
                    store.element.get(element).unwrap_or_else(|| {
                        warn!(id = %EcId::new(element), "unmapped element id in geometry stream");
                        0
                    })
                },
                // Fonts are externally mapped; unmapped ids pass through.
                |font| store.font.get(font).unwrap_or(font),
            )
            .map_err(|e| {
                rusqlite::Error::UserFunctionError(Box::new(GraftError::MalformedGeometry {
                    detail: e.to_string(),
                }))
            })?;
            Ok(Some(remapped))
        },
    )?;

    conn.create_scalar_function(
        "hex_to_id",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |f| {
            let text: Option<String> = f.get(0)?;
            Ok(match text {
                Some(text) => Some(
                    EcId::from_hex(&text)
                        .ok_or_else(|| {
                            rusqlite::Error::UserFunctionError(
                                format!("not a hex id: '{text}'").into(),
                            )
                        })?
                        .as_i64(),
                ),
                None => None,
            })
        },
    )?;
    Ok(())
}
