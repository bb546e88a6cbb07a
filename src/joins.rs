//! Join graph validation.

use std::collections::HashSet;

use crate::ast::{AliasedTable, JoinCondition};
use crate::error::{CargoError, CargoResult};

/// Check that `conditions` reference declared aliases and connect every table.
///
/// Starting from the first edge's left table, newly reachable aliases are
/// marked until a fixpoint; any declared alias left unmarked is reported.
pub fn validate_join_graph(tables: &[AliasedTable], conditions: &[JoinCondition]) -> CargoResult<()> {
    for condition in conditions {
        for alias in [&condition.table1, &condition.table2] {
            if !tables.iter().any(|t| &t.alias == alias) {
                return Err(CargoError::schema(format!(
                    "table alias '{}' in join conditions is not declared in tables",
                    alias
                )));
            }
        }
    }

    let Some(first) = conditions.first() else {
        if tables.len() > 1 {
            return Err(CargoError::structure(
                "multiple tables specified, but no join conditions",
            ));
        }
        return Ok(());
    };

    let mut reached: HashSet<&str> = HashSet::new();
    reached.insert(first.table1.as_str());
    loop {
        let before = reached.len();
        for condition in conditions {
            let (left, right) = (condition.table1.as_str(), condition.table2.as_str());
            if reached.contains(left) {
                reached.insert(right);
            }
            if reached.contains(right) {
                reached.insert(left);
            }
        }
        if reached.len() == before {
            break;
        }
    }

    if let Some(missing) = tables.iter().find(|t| !reached.contains(t.alias.as_str())) {
        return Err(CargoError::structure(format!(
            "table '{}' is not included within the join conditions",
            missing.alias
        )));
    }
    Ok(())
}
