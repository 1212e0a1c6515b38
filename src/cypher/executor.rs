//! Store-backed evaluation of parsed Cypher-subset queries.

use super::parser::{
    CompareOp, CypherQuery, Expr, Literal, NodePattern, Operand, ReturnItems, ValueRef,
};
use crate::models::{Entity, EntityType, RelationshipType};
use crate::storage::GraphStore;
use crate::{Error, Result};
use serde_json::{Value, json};
use std::collections::HashMap;

/// One projected result row: column name → value.
pub type QueryRow = HashMap<String, Value>;

type Binding = HashMap<String, Entity>;

/// Executes a parsed query against the store.
///
/// The first node of each path anchors on `list_by_type` (or a full scan
/// when unlabeled); each step expands through `neighbors` with the
/// pattern's relationship-type filter; multiple MATCH patterns cross-join.
///
/// # Errors
///
/// Propagates store failures and returns [`Error::Query`] for references
/// to unbound variables.
pub fn execute(store: &GraphStore, query: &CypherQuery) -> Result<Vec<QueryRow>> {
    let mut bindings: Vec<Binding> = vec![Binding::new()];

    for path in &query.matches {
        let mut extended: Vec<Binding> = Vec::new();
        for binding in &bindings {
            extended.extend(match_path(store, path, binding)?);
        }
        bindings = extended;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }
    }

    if let Some(predicate) = &query.where_clause {
        bindings.retain(|binding| eval_expr(predicate, binding).unwrap_or(false));
    }

    let mut rows: Vec<QueryRow> = bindings
        .iter()
        .map(|binding| project(binding, &query.return_items))
        .collect::<Result<_>>()?;

    if !query.order_by.is_empty() {
        // Sort keys resolve through the projected row first, so aliases
        // work, then fall back to the binding.
        let keyed: Vec<(Vec<Value>, QueryRow)> = rows
            .into_iter()
            .zip(bindings.iter())
            .map(|(row, binding)| {
                let keys = query
                    .order_by
                    .iter()
                    .map(|ob| order_key(&row, binding, &ob.value))
                    .collect();
                (keys, row)
            })
            .collect();
        let mut keyed = keyed;
        keyed.sort_by(|(a, _), (b, _)| {
            for (ob, (ka, kb)) in query.order_by.iter().zip(a.iter().zip(b.iter())) {
                let ordering = compare_values(ka, kb);
                let ordering = if ob.descending { ordering.reverse() } else { ordering };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

/// Collects distinct entity ids from entity-shaped values in result rows.
#[must_use]
pub fn collect_entity_ids(rows: &[QueryRow]) -> Vec<String> {
    let mut ids = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for row in rows {
        for value in row.values() {
            if let Some(id) = value.get("id").and_then(Value::as_str) {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    ids
}

fn match_path(store: &GraphStore, path: &super::parser::PathPattern, base: &Binding) -> Result<Vec<Binding>> {
    let anchors = anchor_candidates(store, &path.start, base)?;
    let mut current: Vec<Binding> = Vec::new();
    for entity in anchors {
        if let Some(binding) = bind_node(base.clone(), &path.start, entity) {
            current.push(binding);
        }
    }

    for (rel, node) in &path.steps {
        let rel_filter = rel.rel_type.as_deref().map(RelationshipType::parse);
        let mut next: Vec<Binding> = Vec::new();
        for binding in current {
            let Some(from) = last_bound(&binding, &path.start, &path.steps, rel, node) else {
                continue;
            };
            let candidates = store.neighbors(&from, rel.max_hops, rel_filter.as_ref())?;
            for candidate in candidates {
                if !node_matches(node, &candidate) {
                    continue;
                }
                if let Some(extended) = bind_node(binding.clone(), node, candidate) {
                    next.push(extended);
                }
            }
        }
        current = next;
    }

    Ok(current)
}

/// The entity id the next hop expands from: the previously bound node of
/// this path (the step before this one, or the anchor).
fn last_bound(
    binding: &Binding,
    start: &NodePattern,
    steps: &[(super::parser::RelPattern, NodePattern)],
    rel: &super::parser::RelPattern,
    _node: &NodePattern,
) -> Option<String> {
    let mut previous = start;
    for (step_rel, step_node) in steps {
        if std::ptr::eq(step_rel, rel) {
            break;
        }
        previous = step_node;
    }
    previous
        .variable
        .as_ref()
        .and_then(|v| binding.get(v))
        .map(|e| e.id.clone())
}

fn anchor_candidates(
    store: &GraphStore,
    node: &NodePattern,
    base: &Binding,
) -> Result<Vec<Entity>> {
    // A variable already bound by an earlier MATCH re-anchors on its value.
    if let Some(existing) = node.variable.as_ref().and_then(|v| base.get(v)) {
        let entity = existing.clone();
        return Ok(if node_matches(node, &entity) {
            vec![entity]
        } else {
            Vec::new()
        });
    }

    let candidates = match node.label.as_deref().map(EntityType::parse) {
        Some(Some(entity_type)) => store.list_by_type(entity_type)?,
        Some(None) => Vec::new(),
        None => store.list_entities()?,
    };
    Ok(candidates
        .into_iter()
        .filter(|e| node_matches(node, e))
        .collect())
}

fn bind_node(mut binding: Binding, node: &NodePattern, entity: Entity) -> Option<Binding> {
    let Some(variable) = &node.variable else {
        return Some(binding);
    };
    match binding.get(variable) {
        Some(existing) if existing.id != entity.id => None,
        _ => {
            binding.insert(variable.clone(), entity);
            Some(binding)
        },
    }
}

fn node_matches(node: &NodePattern, entity: &Entity) -> bool {
    if let Some(label) = &node.label {
        match EntityType::parse(label) {
            Some(entity_type) if entity.entity_type == entity_type => {},
            _ => return false,
        }
    }
    node.properties.iter().all(|(key, literal)| {
        entity_property(entity, key).is_some_and(|value| literal_matches(&value, literal))
    })
}

fn literal_matches(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::String(s), Literal::Str(expected)) => s.eq_ignore_ascii_case(expected),
        (Value::Number(n), Literal::Number(expected)) => {
            n.as_f64().is_some_and(|v| (v - expected).abs() < f64::EPSILON)
        },
        (Value::Bool(b), Literal::Bool(expected)) => b == expected,
        (Value::Null, Literal::Null) => true,
        _ => false,
    }
}

/// Resolves an entity property by name: `name`, `type`, `id`, and
/// `description` are structural; anything else reads the attribute map.
fn entity_property(entity: &Entity, key: &str) -> Option<Value> {
    match key {
        "name" => Some(Value::String(entity.name.clone())),
        "type" => Some(Value::String(entity.entity_type.as_str().to_string())),
        "id" => Some(Value::String(entity.id.clone())),
        "description" => entity.description.clone().map(Value::String),
        "last_modified" => Some(json!(entity.last_modified)),
        _ => entity.attributes.get(key).cloned().map(Value::String),
    }
}

fn resolve_ref(binding: &Binding, value_ref: &ValueRef) -> Result<Value> {
    match value_ref {
        ValueRef::Variable(variable) => binding
            .get(variable)
            .map(entity_json)
            .ok_or_else(|| Error::Query(format!("unbound variable: {variable}"))),
        ValueRef::Property(variable, property) => {
            let entity = binding
                .get(variable)
                .ok_or_else(|| Error::Query(format!("unbound variable: {variable}")))?;
            Ok(entity_property(entity, property).unwrap_or(Value::Null))
        },
    }
}

fn entity_json(entity: &Entity) -> Value {
    json!({
        "id": entity.id,
        "name": entity.name,
        "type": entity.entity_type.as_str(),
        "description": entity.description,
    })
}

fn project(binding: &Binding, items: &ReturnItems) -> Result<QueryRow> {
    let mut row = QueryRow::new();
    match items {
        ReturnItems::Star => {
            for (variable, entity) in binding {
                row.insert(variable.clone(), entity_json(entity));
            }
        },
        ReturnItems::Items(items) => {
            for item in items {
                row.insert(item.column_name(), resolve_ref(binding, &item.value)?);
            }
        },
    }
    Ok(row)
}

fn order_key(row: &QueryRow, binding: &Binding, value_ref: &ValueRef) -> Value {
    if let ValueRef::Variable(name) = value_ref {
        if let Some(value) = row.get(name) {
            return value.clone();
        }
    }
    resolve_ref(binding, value_ref).unwrap_or(Value::Null)
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn eval_expr(expr: &Expr, binding: &Binding) -> Result<bool> {
    match expr {
        Expr::And(lhs, rhs) => Ok(eval_expr(lhs, binding)? && eval_expr(rhs, binding)?),
        Expr::Or(lhs, rhs) => Ok(eval_expr(lhs, binding)? || eval_expr(rhs, binding)?),
        Expr::Not(inner) => Ok(!eval_expr(inner, binding)?),
        Expr::Compare { lhs, op, rhs } => eval_compare(lhs, *op, rhs, binding),
    }
}

fn operand_value(operand: &Operand, binding: &Binding) -> Result<Value> {
    match operand {
        Operand::Ref(value_ref) => resolve_ref(binding, value_ref),
        Operand::Literal(literal) => Ok(literal_json(literal)),
    }
}

fn literal_json(literal: &Literal) -> Value {
    match literal {
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Number(n) => json!(n),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
        Literal::List(items) => Value::Array(items.iter().map(literal_json).collect()),
    }
}

fn eval_compare(lhs: &Operand, op: CompareOp, rhs: &Operand, binding: &Binding) -> Result<bool> {
    let left = operand_value(lhs, binding)?;
    let right = operand_value(rhs, binding)?;

    let result = match op {
        CompareOp::Eq => values_equal(&left, &right),
        CompareOp::Ne => !values_equal(&left, &right),
        CompareOp::Lt => compare_values(&left, &right) == std::cmp::Ordering::Less,
        CompareOp::Gt => compare_values(&left, &right) == std::cmp::Ordering::Greater,
        CompareOp::Le => compare_values(&left, &right) != std::cmp::Ordering::Greater,
        CompareOp::Ge => compare_values(&left, &right) != std::cmp::Ordering::Less,
        CompareOp::Contains => string_op(&left, &right, |l, r| l.contains(r)),
        CompareOp::StartsWith => string_op(&left, &right, |l, r| l.starts_with(r)),
        CompareOp::EndsWith => string_op(&left, &right, |l, r| l.ends_with(r)),
        CompareOp::In => match &right {
            Value::Array(items) => items.iter().any(|item| values_equal(&left, item)),
            _ => false,
        },
    };
    Ok(result)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}

fn string_op(left: &Value, right: &Value, op: impl Fn(&str, &str) -> bool) -> bool {
    match (left, right) {
        (Value::String(l), Value::String(r)) => op(&l.to_lowercase(), &r.to_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cypher::parser::parse;
    use crate::models::Relationship;

    fn workplace_store() -> GraphStore {
        let store = GraphStore::in_memory().unwrap();
        let ada = Entity::new(EntityType::Person, "Ada").with_attribute("seniority", "principal");
        let bob = Entity::new(EntityType::Person, "Bob");
        let carol = Entity::new(EntityType::Person, "Carol");
        let acme = Entity::new(EntityType::Organization, "Acme");
        for e in [&ada, &bob, &carol, &acme] {
            store.add_entity(e).unwrap();
        }
        for person in [&ada, &bob] {
            store
                .add_relationship(&Relationship::new(
                    person.id.clone(),
                    RelationshipType::WorksAt,
                    acme.id.clone(),
                ))
                .unwrap();
        }
        store
            .add_relationship(&Relationship::new(
                ada.id,
                RelationshipType::Knows,
                carol.id,
            ))
            .unwrap();
        store
    }

    fn run(store: &GraphStore, text: &str) -> Vec<QueryRow> {
        execute(store, &parse(text).unwrap()).unwrap()
    }

    #[test]
    fn test_people_at_org() {
        let store = workplace_store();
        let rows = run(
            &store,
            "MATCH (p:PERSON)-[:WORKS_AT]-(o:ORGANIZATION {name: 'Acme'}) RETURN p.name",
        );
        let mut names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("p.name").and_then(Value::as_str))
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Ada", "Bob"]);
    }

    #[test]
    fn test_two_hop_traversal() {
        let store = workplace_store();
        // Carol is two hops from Acme (Acme - Ada - Carol).
        let rows = run(
            &store,
            "MATCH (o:ORGANIZATION {name: 'Acme'})-[r*1..2]-(p:PERSON) RETURN p.name",
        );
        let names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("p.name").and_then(Value::as_str))
            .collect();
        assert!(names.contains(&"Carol"));
    }

    #[test]
    fn test_where_not_and_in() {
        let store = workplace_store();
        let rows = run(
            &store,
            "MATCH (p:PERSON) WHERE NOT p.name IN ['Bob', 'Carol'] RETURN p.name",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("p.name").unwrap(), "Ada");
    }

    #[test]
    fn test_attribute_property_access() {
        let store = workplace_store();
        let rows = run(
            &store,
            "MATCH (p:PERSON) WHERE p.seniority = 'principal' RETURN p",
        );
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_cross_join_matches() {
        let store = workplace_store();
        let rows = run(
            &store,
            "MATCH (p:PERSON {name: 'Ada'}) MATCH (o:ORGANIZATION) RETURN p.name, o.name",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("o.name").unwrap(), "Acme");
    }

    #[test]
    fn test_return_star() {
        let store = workplace_store();
        let rows = run(&store, "MATCH (p:PERSON {name: 'Ada'}) RETURN *");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("p"));
    }

    #[test]
    fn test_order_by_desc_limit() {
        let store = workplace_store();
        let rows = run(
            &store,
            "MATCH (p:PERSON) RETURN p.name ORDER BY p.name DESC LIMIT 2",
        );
        let names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("p.name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec!["Carol", "Bob"]);
    }

    #[test]
    fn test_unknown_label_yields_empty() {
        let store = workplace_store();
        let rows = run(&store, "MATCH (x:WIDGET) RETURN x");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_repeated_variable_must_agree() {
        let store = workplace_store();
        // p bound by the first MATCH constrains the second.
        let rows = run(
            &store,
            "MATCH (p:PERSON {name: 'Ada'}) MATCH (p)-[:KNOWS]-(q:PERSON) RETURN q.name",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("q.name").unwrap(), "Carol");
    }
}
