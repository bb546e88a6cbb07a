//! Coordinates fields.
//!
//! Cargo stores a coordinates field as `<field>__full` (the original text)
//! plus numeric `<field>__lat` and `<field>__lon` columns. `NEAR` compiles
//! into a latitude/longitude bounding box over those columns.

use crate::ast::{AliasedField, Node, split_commas, walk_sequences_mut};
use crate::error::{CargoError, CargoResult};
use crate::query::CargoQuery;
use crate::schema::FieldType;

use super::{FieldRef, fields_where};

/// Kilometres per degree of latitude.
const KM_PER_DEGREE_LAT: f64 = 111.0;
/// Kilometres per degree of longitude at the equator.
const KM_PER_DEGREE_LON: f64 = 111.321;
const KM_PER_MILE: f64 = 1.60934;

/// A latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box of half-width `distance_km` around a point, clamped to valid coordinates.
    pub fn around(lat: f64, lon: f64, distance_km: f64) -> Self {
        let lat_delta = distance_km / KM_PER_DEGREE_LAT;
        let lon_delta = distance_km / (KM_PER_DEGREE_LON * lat.to_radians().cos());
        Self {
            min_lat: (lat - lat_delta).max(-90.0),
            max_lat: (lat + lat_delta).min(90.0),
            min_lon: (lon - lon_delta).max(-180.0),
            max_lon: (lon + lon_delta).min(180.0),
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

pub fn apply(query: &mut CargoQuery) -> CargoResult<()> {
    let fields = fields_where(query, |d| d.field_type == FieldType::Coordinates && !d.is_list);
    for field in &fields {
        rewrite_selected(query, field);
        walk_sequences_mut(&mut query.where_clause, &mut |seq| rewrite_near(seq, field))?;
        for item in query.order_by.iter_mut() {
            replace_with_full(item, field);
        }
    }
    Ok(())
}

/// A selected coordinates field becomes `__full`, followed by its `lat`/`lon` columns.
fn rewrite_selected(query: &mut CargoQuery, field: &FieldRef) {
    let mut rewritten = Vec::with_capacity(query.fields.len());
    for mut selected in std::mem::take(&mut query.fields) {
        let Some(qualifier) = selected
            .single_column()
            .filter(|(q, name)| *name == field.field && q.is_none_or(|q| q == field.alias))
            .map(|(q, _)| q.map(str::to_string))
        else {
            replace_with_full(&mut selected.expr, field);
            rewritten.push(selected);
            continue;
        };

        let alias = selected.alias.clone();
        selected.expr = vec![Node::qualified(qualifier.as_deref(), &format!("{}__full", field.field))];
        rewritten.push(selected);
        for (suffix, column) in [("lat", "__lat"), ("lon", "__lon")] {
            rewritten.push(AliasedField::new(
                &format!("{} {}", alias, suffix),
                vec![Node::qualified(qualifier.as_deref(), &format!("{}{}", field.field, column))],
            ));
        }
    }
    query.fields = rewritten;
}

fn replace_with_full(nodes: &mut Vec<Node>, field: &FieldRef) {
    let full_name = format!("{}__full", field.field);
    let _ = walk_sequences_mut::<()>(nodes, &mut |seq| {
        for node in seq.iter_mut().filter(|n| field.matches(n)) {
            *node = Node::qualified(node.qualifier(), &full_name);
        }
        Ok(())
    });
}

fn rewrite_near(seq: &mut Vec<Node>, field: &FieldRef) -> CargoResult<()> {
    let mut i = 0;
    while i < seq.len() {
        if !field.matches(&seq[i]) {
            i += 1;
            continue;
        }

        let args = match (seq.get(i + 1), seq.get(i + 2)) {
            (Some(op), Some(Node::Group(args))) if op.is_keyword("NEAR") => args,
            _ => {
                return Err(CargoError::syntax(format!(
                    "the only operator allowed for the coordinates field '{}' is NEAR",
                    field.display_name()
                )));
            }
        };

        let parts = split_commas(args);
        let [lat, lon, distance] = parts.as_slice() else {
            return Err(CargoError::syntax(
                "NEAR must be followed by three arguments: latitude, longitude and distance",
            ));
        };
        let lat = number_argument(lat, "latitude")?;
        let lon = number_argument(lon, "longitude")?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CargoError::syntax(format!("invalid coordinates ({}, {}) for NEAR", lat, lon)));
        }
        let distance_km = distance_argument(distance)?;

        let bounds = BoundingBox::around(lat, lon, distance_km);
        tracing::debug!("NEAR on {} compiled to {:?}", field.display_name(), bounds);
        seq.splice(i..i + 3, [bounding_box_condition(field, &bounds)]);
        i += 1;
    }
    Ok(())
}

fn bounding_box_condition(field: &FieldRef, bounds: &BoundingBox) -> Node {
    let lat = Node::column(&field.alias, &format!("{}__lat", field.field));
    let lon = Node::column(&field.alias, &format!("{}__lon", field.field));
    Node::Group(vec![
        lat.clone(),
        Node::symbol(">="),
        Node::number(bounds.min_lat),
        Node::word("AND"),
        lat,
        Node::symbol("<="),
        Node::number(bounds.max_lat),
        Node::word("AND"),
        lon.clone(),
        Node::symbol(">="),
        Node::number(bounds.min_lon),
        Node::word("AND"),
        lon,
        Node::symbol("<="),
        Node::number(bounds.max_lon),
    ])
}

fn number_argument(nodes: &[Node], name: &str) -> CargoResult<f64> {
    match nodes {
        [Node::Number(n)] => n
            .parse()
            .map_err(|_| CargoError::syntax(format!("invalid {} '{}' for NEAR", name, n))),
        _ => Err(CargoError::syntax(format!("the {} for NEAR must be a number", name))),
    }
}

/// Distance as kilometres, from `"50 km"`, `'10 miles'` or `25 mi`.
fn distance_argument(nodes: &[Node]) -> CargoResult<f64> {
    let text = match nodes {
        [Node::Str { body, .. }] => body.clone(),
        [Node::Number(n), Node::Ident { table: None, name }] => format!("{} {}", n, name),
        [Node::Number(n)] => n.clone(),
        _ => String::new(),
    };
    parse_distance(&text)
}

pub fn parse_distance(text: &str) -> CargoResult<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let invalid = || {
        CargoError::syntax(format!(
            "the distance for NEAR must be a number and a unit, such as \"50 km\", got \"{}\"",
            text
        ))
    };
    let number: f64 = number.parse().map_err(|_| invalid())?;
    match unit.trim().to_lowercase().as_str() {
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => Ok(number),
        "mi" | "mile" | "miles" => Ok(number * KM_PER_MILE),
        _ => Err(invalid()),
    }
}
