// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Page credential lookups and the token-refresh audit log.
//!
//! The pipeline treats pages as a read-only credential source; only the
//! token-refresh job and the connect flow write here.

use ferry_core::FerryError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::Page;

const PAGE_COLUMNS: &str = "id, page_id, page_name, page_access_token, token_expires_at, \
                            instagram_id, is_selected, created_at, updated_at";

fn map_page_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        page_id: row.get(1)?,
        page_name: row.get(2)?,
        page_access_token: row.get(3)?,
        token_expires_at: row.get(4)?,
        instagram_id: row.get(5)?,
        is_selected: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Insert or update a page keyed on its platform `page_id`.
pub async fn upsert(
    db: &Database,
    page_id: &str,
    page_name: &str,
    page_access_token: &str,
    token_expires_at: Option<String>,
    instagram_id: Option<String>,
) -> Result<Page, FerryError> {
    let page_id = page_id.to_string();
    let page_name = page_name.to_string();
    let page_access_token = page_access_token.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO pages (page_id, page_name, page_access_token, token_expires_at, instagram_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(page_id) DO UPDATE SET
                     page_name = excluded.page_name,
                     page_access_token = excluded.page_access_token,
                     token_expires_at = excluded.token_expires_at,
                     instagram_id = excluded.instagram_id,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![page_id, page_name, page_access_token, token_expires_at, instagram_id],
            )?;
            let page = conn.query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE page_id = ?1"),
                params![page_id],
                map_page_row,
            )?;
            Ok(page)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a page by row ID.
pub async fn find_by_id(db: &Database, id: i64) -> Result<Option<Page>, FerryError> {
    db.connection()
        .call(move |conn| {
            let page = conn
                .query_row(
                    &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
                    params![id],
                    map_page_row,
                )
                .optional()?;
            Ok(page)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a page by the Instagram business account it is linked to.
pub async fn find_by_instagram_id(
    db: &Database,
    instagram_id: &str,
) -> Result<Option<Page>, FerryError> {
    let instagram_id = instagram_id.to_string();
    db.connection()
        .call(move |conn| {
            let page = conn
                .query_row(
                    &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE instagram_id = ?1"),
                    params![instagram_id],
                    map_page_row,
                )
                .optional()?;
            Ok(page)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Return the currently selected page, if any.
pub async fn find_selected(db: &Database) -> Result<Option<Page>, FerryError> {
    db.connection()
        .call(|conn| {
            let page = conn
                .query_row(
                    &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE is_selected = 1 LIMIT 1"),
                    [],
                    map_page_row,
                )
                .optional()?;
            Ok(page)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reassign the selected page.
///
/// Clearing the old selection and setting the new one happen inside one
/// transaction so no window exists with zero or two selected pages.
pub async fn set_selected(db: &Database, id: i64) -> Result<bool, FerryError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("UPDATE pages SET is_selected = 0 WHERE is_selected = 1", [])?;
            let changed = tx.execute(
                "UPDATE pages SET is_selected = 1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                tx.rollback()?;
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Pages whose token expires within `days` (or has no recorded expiry).
pub async fn find_expiring(db: &Database, days: i64) -> Result<Vec<Page>, FerryError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM pages
                 WHERE token_expires_at IS NULL
                 OR token_expires_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '+' || ?1 || ' days')
                 ORDER BY token_expires_at ASC"
            ))?;
            let rows = stmt.query_map(params![days], map_page_row)?;
            let mut pages = Vec::new();
            for row in rows {
                pages.push(row?);
            }
            Ok(pages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Store a refreshed access token and its new expiry.
pub async fn update_token(
    db: &Database,
    id: i64,
    access_token: &str,
    expires_at: Option<String>,
) -> Result<(), FerryError> {
    let access_token = access_token.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE pages SET
                     page_access_token = ?2,
                     token_expires_at = ?3,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, access_token, expires_at],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Append a token-refresh audit row.
pub async fn insert_refresh_log(
    db: &Database,
    page_id: i64,
    status: &str,
    detail: Option<String>,
) -> Result<(), FerryError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO token_refresh_log (page_id, status, detail) VALUES (?1, ?2, ?3)",
                params![page_id, status, detail],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
