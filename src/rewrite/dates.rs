//! Date precision companions.
//!
//! Cargo keeps a `<field>__precision` column next to every date field,
//! recording whether the stored value was a full date, a month or a year.
//! Each selected date field gets that column as an extra output field.

use crate::ast::{AliasedField, Node};
use crate::query::CargoQuery;
use crate::resolver::ResolvedField;

pub fn apply(query: &mut CargoQuery, resolved: &[(String, ResolvedField)]) {
    let mut companions = Vec::new();

    for field in &query.fields {
        let Some((_, resolved)) = resolved.iter().find(|(alias, _)| *alias == field.alias) else {
            continue;
        };
        let description = &resolved.description;
        if !description.field_type.is_date() || description.is_list || field.is_function() {
            continue;
        }
        let Some((qualifier, name)) = field.single_column() else {
            continue;
        };

        companions.push(AliasedField::new(
            &format!("{}__precision", field.alias),
            vec![Node::qualified(qualifier, &format!("{}__precision", name))],
        ));
    }

    for companion in companions {
        if query.fields.iter().all(|f| f.alias != companion.alias) {
            tracing::debug!("Added date precision field '{}'", companion.alias);
            query.fields.push(companion);
        }
    }
}
