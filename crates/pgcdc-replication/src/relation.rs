use crate::pgoutput::RelationMessage;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: u32,
}

/// Cached per `oid` on receiving a `Relation` message. Immutable once
/// created; replaced wholesale (not merged) on schema evolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub oid: u32,
    pub schema: String,
    pub table: String,
    pub columns: Vec<Column>,
    pub primary_key_columns: Vec<String>,
}

impl Relation {
    pub fn full_name(&self) -> String {
        pgcdc_core::full_table_name(&self.schema, &self.table)
    }
}

impl From<&RelationMessage> for Relation {
    fn from(msg: &RelationMessage) -> Self {
        Relation {
            oid: msg.relation_id,
            schema: msg.namespace.clone(),
            table: msg.name.clone(),
            columns: msg
                .columns
                .iter()
                .map(|c| Column { name: c.name.clone(), type_oid: c.type_oid })
                .collect(),
            primary_key_columns: Vec::new(),
        }
    }
}

/// Maps relation OIDs (assigned by the server, stable for the life of the
/// stream unless the table is recreated) to their cached schema.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<u32, Relation>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relation: Relation) {
        self.relations.insert(relation.oid, relation);
    }

    pub fn get(&self, oid: u32) -> Option<&Relation> {
        self.relations.get(&oid)
    }

    pub fn set_primary_key(&mut self, oid: u32, columns: Vec<String>) {
        if let Some(rel) = self.relations.get_mut(&oid) {
            rel.primary_key_columns = columns;
        }
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgoutput::ColumnInfo;

    fn msg() -> RelationMessage {
        RelationMessage {
            relation_id: 1,
            namespace: "public".into(),
            name: "records".into(),
            replica_identity: crate::pgoutput::ReplicaIdentity::Default,
            columns: vec![ColumnInfo { flags: 1, name: "id".into(), type_oid: 23, type_modifier: -1 }],
        }
    }

    #[test]
    fn caches_and_looks_up() {
        let mut cache = RelationCache::new();
        cache.insert(Relation::from(&msg()));
        assert_eq!(cache.len(), 1);
        let rel = cache.get(1).unwrap();
        assert_eq!(rel.full_name(), "records");
    }

    #[test]
    fn schema_qualifies_non_public() {
        let mut m = msg();
        m.namespace = "alternate".into();
        let rel = Relation::from(&m);
        assert_eq!(rel.full_name(), "alternate.records");
    }

    #[test]
    fn replaces_wholesale_on_re_relation() {
        let mut cache = RelationCache::new();
        cache.insert(Relation::from(&msg()));
        cache.set_primary_key(1, vec!["id".into()]);

        let mut m2 = msg();
        m2.columns.push(ColumnInfo { flags: 0, name: "name".into(), type_oid: 25, type_modifier: -1 });
        cache.insert(Relation::from(&m2));

        let rel = cache.get(1).unwrap();
        assert_eq!(rel.columns.len(), 2);
        assert!(rel.primary_key_columns.is_empty());
    }
}
