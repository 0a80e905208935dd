//! Schema reconciliation for multiset unions of tables.
//!
//! The plan is computed as plain data from column metadata and then handed to
//! [`WorkingStore::union_all`](crate::store::WorkingStore::union_all) for execution.

use anyhow::{anyhow, Result};

use crate::store::{ColumnDef, ColumnType, Schema};

/// How one output column is produced from one source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectedColumn {
    /// Source column already has the union type.
    Keep(String),
    /// Source column is cast to the union type.
    Cast(String, ColumnType),
    /// Column is absent from the source: typed null.
    Null(ColumnType),
}

/// Row projection of one contributing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub source: String,
    pub columns: Vec<ProjectedColumn>,
}

/// Union schema plus one projection per contributing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionPlan {
    pub schema: Schema,
    pub projections: Vec<Projection>,
}

/// Compute the union of the given schemas and the null-padding projections.
///
/// Union column order is first appearance across inputs in input order.
pub fn plan_union(inputs: &[(&str, &Schema)]) -> Result<UnionPlan> {
    let mut union: Vec<ColumnDef> = Vec::new();
    for (table, schema) in inputs {
        for col in schema.columns() {
            match union.iter_mut().find(|c| c.name == col.name) {
                Some(existing) => {
                    existing.ty = existing.ty.unify(col.ty).ok_or_else(|| anyhow!(
                        "[store::union] column '{}' is {} in one table and {} in '{}'",
                        col.name, existing.ty, col.ty, table
                    ))?;
                }
                None => union.push(col.clone()),
            }
        }
    }

    let projections = inputs.iter()
        .map(|(table, schema)| Projection {
            source: table.to_string(),
            columns: union.iter()
                .map(|target| match schema.get(&target.name) {
                    Some(col) if col.ty == target.ty => ProjectedColumn::Keep(col.name.clone()),
                    Some(col) => ProjectedColumn::Cast(col.name.clone(), target.ty),
                    None => ProjectedColumn::Null(target.ty),
                })
                .collect(),
        })
        .collect();

    Ok(UnionPlan { schema: Schema::new(union)?, projections })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ColumnType::*;

    #[test]
    fn union_pads_missing_columns_with_typed_nulls() {
        let a = Schema::of(&[("id", Integer), ("the_geom", Geometry), ("pop", Double)]).unwrap();
        let b = Schema::of(&[("id", BigInt), ("the_geom", Geometry), ("traffic", Decfloat)]).unwrap();
        let plan = plan_union(&[("a", &a), ("b", &b)]).unwrap();

        assert_eq!(
            plan.schema.names().collect::<Vec<_>>(),
            vec!["id", "the_geom", "pop", "traffic"]
        );
        assert_eq!(plan.schema.get("id").unwrap().ty, BigInt);
        assert_eq!(plan.projections[0].columns, vec![
            ProjectedColumn::Cast("id".into(), BigInt),
            ProjectedColumn::Keep("the_geom".into()),
            ProjectedColumn::Keep("pop".into()),
            ProjectedColumn::Null(Decfloat),
        ]);
        assert_eq!(plan.projections[1].columns, vec![
            ProjectedColumn::Keep("id".into()),
            ProjectedColumn::Keep("the_geom".into()),
            ProjectedColumn::Null(Double),
            ProjectedColumn::Keep("traffic".into()),
        ]);
    }

    #[test]
    fn single_input_plan_is_identity() {
        let a = Schema::of(&[("id", Integer), ("the_geom", Geometry)]).unwrap();
        let plan = plan_union(&[("a", &a)]).unwrap();
        assert_eq!(plan.schema, a);
        assert!(plan.projections[0].columns.iter().all(|c| matches!(c, ProjectedColumn::Keep(_))));
    }

    #[test]
    fn geometry_type_conflict_fails() {
        let a = Schema::of(&[("x", Geometry)]).unwrap();
        let b = Schema::of(&[("x", Text)]).unwrap();
        assert!(plan_union(&[("a", &a), ("b", &b)]).is_err());
    }
}
