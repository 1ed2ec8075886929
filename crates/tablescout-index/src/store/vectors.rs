//! Vector entry operations for IndexStore (the sqlite-vec adapter).

use super::{IndexStore, embedding_bytes};
use crate::error::{Result, StoreError};
use crate::schema::{
    ATTRIBUTES_VERSION, Collection, EntryAttributes, StoredEntry, VectorEntry, VectorFilter,
    VectorHit,
};
use crate::tenant::Tenant;
use crate::vector::VectorIndex;
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use tracing::debug;

/// sqlite-vec refuses KNN queries with k above this.
const MAX_KNN: usize = 4096;

fn decode_attributes(id: &str, json: &str) -> Result<EntryAttributes> {
    serde_json::from_str(json).map_err(|source| StoreError::Attributes {
        id: id.to_string(),
        source,
    })
}

/// Build `WHERE` conditions over `vector_entries` for a filter.
fn entry_conditions<'a>(
    collection: Collection,
    tenant: &'a Tenant,
    table_name: Option<&'a String>,
) -> (String, Vec<Box<dyn ToSql + 'a>>) {
    let mut sql = String::from("collection = ?1 AND database_id = ?2 AND schema_name = ?3");
    let mut values: Vec<Box<dyn ToSql + 'a>> = vec![
        Box::new(collection.as_str()),
        Box::new(&tenant.database_id),
        Box::new(&tenant.schema_name),
    ];
    if let Some(table) = table_name {
        sql.push_str(" AND table_name = ?4");
        values.push(Box::new(table));
    }
    (sql, values)
}

/// Insert or replace one entry using an already-locked connection.
///
/// Callers are responsible for running this inside a transaction.
pub(crate) fn upsert_entry_in(conn: &Connection, dimension: usize, entry: &VectorEntry) -> Result<()> {
    if !entry.tenant.is_scoped() {
        return Err(StoreError::TenantNotScoped { operation: "upsert" });
    }
    if entry.vector.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: entry.vector.len(),
        });
    }

    let collection = entry.attributes.collection();
    let attributes_json =
        serde_json::to_string(&entry.attributes).map_err(|source| StoreError::Attributes {
            id: entry.id.clone(),
            source,
        })?;
    let table_name = entry.attributes.table_name();

    // Ids are unique per tenant; an entry never moves between tenants
    let existing: Option<i64> = conn
        .query_row(
            "SELECT entry_id FROM vector_entries
             WHERE collection = ?1 AND database_id = ?2 AND schema_name = ?3 AND entity_id = ?4",
            params![
                collection.as_str(),
                entry.tenant.database_id,
                entry.tenant.schema_name,
                entry.id
            ],
            |row| row.get(0),
        )
        .optional()?;

    let entry_id = match existing {
        Some(entry_id) => {
            conn.execute(
                "UPDATE vector_entries
                 SET table_name = ?1, document = ?2, attributes_json = ?3, attributes_version = ?4
                 WHERE entry_id = ?5",
                params![
                    table_name,
                    entry.document,
                    attributes_json,
                    ATTRIBUTES_VERSION,
                    entry_id,
                ],
            )?;
            conn.execute(
                &format!("DELETE FROM {} WHERE entry_id = ?1", collection.vec_table()),
                [entry_id],
            )?;
            entry_id
        }
        None => {
            conn.execute(
                "INSERT INTO vector_entries
                 (collection, entity_id, database_id, schema_name, table_name, document,
                  attributes_json, attributes_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    collection.as_str(),
                    entry.id,
                    entry.tenant.database_id,
                    entry.tenant.schema_name,
                    table_name,
                    entry.document,
                    attributes_json,
                    ATTRIBUTES_VERSION,
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    let bytes = embedding_bytes(&entry.vector);
    match collection {
        Collection::Columns => {
            conn.execute(
                "INSERT INTO columns_vec (entry_id, embedding, database_id, schema_name, table_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry_id,
                    bytes,
                    entry.tenant.database_id,
                    entry.tenant.schema_name,
                    table_name.unwrap_or_default(),
                ],
            )?;
        }
        Collection::Tables | Collection::Patterns => {
            conn.execute(
                &format!(
                    "INSERT INTO {} (entry_id, embedding, database_id, schema_name)
                     VALUES (?1, ?2, ?3, ?4)",
                    collection.vec_table()
                ),
                params![
                    entry_id,
                    bytes,
                    entry.tenant.database_id,
                    entry.tenant.schema_name,
                ],
            )?;
        }
    }

    Ok(())
}

/// Delete entries matching a filter using an already-locked connection.
pub(crate) fn delete_entries_in(
    conn: &Connection,
    collection: Collection,
    tenant: &Tenant,
    table_name: Option<&String>,
    entity_id: Option<&str>,
) -> Result<usize> {
    let (mut conditions, mut values) = entry_conditions(collection, tenant, table_name);
    if let Some(id) = entity_id {
        conditions.push_str(&format!(" AND entity_id = ?{}", values.len() + 1));
        values.push(Box::new(id.to_string()));
    }

    let ids: Vec<i64> = {
        let mut stmt =
            conn.prepare(&format!("SELECT entry_id FROM vector_entries WHERE {conditions}"))?;
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        stmt.query_map(refs.as_slice(), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };

    let delete_vec = format!("DELETE FROM {} WHERE entry_id = ?1", collection.vec_table());
    for id in &ids {
        conn.execute(&delete_vec, [id])?;
        conn.execute("DELETE FROM vector_entries WHERE entry_id = ?1", [id])?;
    }

    Ok(ids.len())
}

impl VectorIndex for IndexStore {
    fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        self.with_transaction(|conn| upsert_entry_in(conn, self.dimension, entry))?;
        debug!(
            collection = entry.attributes.collection().as_str(),
            id = %entry.id,
            tenant = %entry.tenant,
            "Upserted vector entry"
        );
        Ok(())
    }

    fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>> {
        let tenant = filter.scoped_tenant("query")?;
        self.check_dimension(vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let k = top_k.min(MAX_KNN) as i64;

        self.with_conn(|conn| {
            let bytes = embedding_bytes(vector);
            let vec_table = collection.vec_table();

            let neighbors: Vec<(i64, f32)> = match (collection, filter.table_name.as_ref()) {
                (Collection::Columns, Some(table)) => {
                    let mut stmt = conn.prepare(
                        "SELECT entry_id, distance FROM columns_vec
                         WHERE embedding MATCH ?1 AND k = ?2
                           AND database_id = ?3 AND schema_name = ?4 AND table_name = ?5
                         ORDER BY distance",
                    )?;
                    stmt.query_map(
                        params![bytes, k, tenant.database_id, tenant.schema_name, table],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<Result<Vec<_>, _>>()?
                }
                _ => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT entry_id, distance FROM {vec_table}
                         WHERE embedding MATCH ?1 AND k = ?2
                           AND database_id = ?3 AND schema_name = ?4
                         ORDER BY distance"
                    ))?;
                    stmt.query_map(
                        params![bytes, k, tenant.database_id, tenant.schema_name],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<Result<Vec<_>, _>>()?
                }
            };

            let mut stmt = conn.prepare(
                "SELECT entity_id, database_id, schema_name, document, attributes_json
                 FROM vector_entries WHERE entry_id = ?1",
            )?;

            let mut hits = Vec::with_capacity(neighbors.len());
            for (entry_id, distance) in neighbors {
                let row = stmt
                    .query_row([entry_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })
                    .optional()?;

                // A vec row without its entry row is skipped rather than surfaced
                let Some((id, database_id, schema_name, document, attributes_json)) = row else {
                    continue;
                };
                let hit_tenant = Tenant::new(database_id, schema_name);
                if &hit_tenant != tenant {
                    continue;
                }
                let attributes = decode_attributes(&id, &attributes_json)?;
                hits.push(VectorHit {
                    id,
                    tenant: hit_tenant,
                    distance,
                    document,
                    attributes,
                });
            }

            Ok(hits)
        })
    }

    fn delete(&self, collection: Collection, filter: &VectorFilter) -> Result<usize> {
        let tenant = filter.scoped_tenant("delete")?;
        let removed = self.with_transaction(|conn| {
            delete_entries_in(conn, collection, tenant, filter.table_name.as_ref(), None)
        })?;
        debug!(collection = collection.as_str(), tenant = %tenant, removed, "Deleted vector entries");
        Ok(removed)
    }

    fn list(&self, collection: Collection, filter: &VectorFilter) -> Result<Vec<StoredEntry>> {
        let tenant = filter.scoped_tenant("list")?;
        self.with_conn(|conn| {
            let (conditions, values) =
                entry_conditions(collection, tenant, filter.table_name.as_ref());
            let mut stmt = conn.prepare(&format!(
                "SELECT entity_id, database_id, schema_name, document, attributes_json
                 FROM vector_entries WHERE {conditions} ORDER BY entry_id"
            ))?;
            let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt
                .query_map(refs.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, database_id, schema_name, document, attributes_json)| -> Result<StoredEntry> {
                    let attributes = decode_attributes(&id, &attributes_json)?;
                    Ok(StoredEntry {
                        id,
                        tenant: Tenant::new(database_id, schema_name),
                        document,
                        attributes,
                    })
                })
                .collect()
        })
    }
}

impl IndexStore {
    /// Fetch one entry by id, only if it belongs to `tenant`.
    pub fn get_entry(
        &self,
        collection: Collection,
        tenant: &Tenant,
        id: &str,
    ) -> Result<Option<StoredEntry>> {
        if !tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped { operation: "get_entry" });
        }
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT document, attributes_json FROM vector_entries
                     WHERE collection = ?1 AND entity_id = ?2
                       AND database_id = ?3 AND schema_name = ?4",
                    params![
                        collection.as_str(),
                        id,
                        tenant.database_id,
                        tenant.schema_name
                    ],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            row.map(|(document, attributes_json)| -> Result<StoredEntry> {
                Ok(StoredEntry {
                    id: id.to_string(),
                    tenant: tenant.clone(),
                    document,
                    attributes: decode_attributes(id, &attributes_json)?,
                })
            })
            .transpose()
        })
    }

    /// Replace one table entry and its whole column set in a single transaction.
    ///
    /// Every column of the table not in `columns` is removed. Readers see the
    /// old table or the new one, never a partial column set; on error nothing
    /// changes. Returns how many previous columns are gone.
    pub fn replace_table(&self, table: &VectorEntry, columns: &[VectorEntry]) -> Result<usize> {
        let tenant = &table.tenant;
        if !tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped {
                operation: "replace_table",
            });
        }
        let EntryAttributes::Table(attributes) = &table.attributes else {
            return Err(StoreError::InvalidData(format!(
                "{} does not carry table attributes",
                table.id
            )));
        };
        let table_name = attributes.table_name.clone();
        for column in columns {
            let belongs = column.tenant == *tenant
                && matches!(&column.attributes, EntryAttributes::Column(c) if c.table_name == table_name);
            if !belongs {
                return Err(StoreError::InvalidData(format!(
                    "{} is not a column of {table_name} in {tenant}",
                    column.id
                )));
            }
        }

        let removed = self.with_transaction(|conn| {
            let previous: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT entity_id FROM vector_entries
                     WHERE collection = ?1 AND database_id = ?2 AND schema_name = ?3
                       AND table_name = ?4",
                )?;
                stmt.query_map(
                    params![
                        Collection::Columns.as_str(),
                        tenant.database_id,
                        tenant.schema_name,
                        table_name
                    ],
                    |row| row.get(0),
                )?
                .collect::<Result<Vec<_>, _>>()?
            };
            let removed = previous
                .iter()
                .filter(|id| !columns.iter().any(|c| &c.id == *id))
                .count();

            delete_entries_in(conn, Collection::Columns, tenant, Some(&table_name), None)?;
            upsert_entry_in(conn, self.dimension, table)?;
            for column in columns {
                upsert_entry_in(conn, self.dimension, column)?;
            }
            Ok(removed)
        })?;

        debug!(
            tenant = %tenant,
            table = %table_name,
            columns = columns.len(),
            removed,
            "Replaced table entries"
        );
        Ok(removed)
    }

    /// Number of entries in a collection for one tenant.
    pub fn count_entries(&self, collection: Collection, tenant: &Tenant) -> Result<usize> {
        if !tenant.is_scoped() {
            return Err(StoreError::TenantNotScoped {
                operation: "count_entries",
            });
        }
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM vector_entries
                 WHERE collection = ?1 AND database_id = ?2 AND schema_name = ?3",
                params![collection.as_str(), tenant.database_id, tenant.schema_name],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}
