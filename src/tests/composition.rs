//! Composition across several bloks: reopening, cooperative methods, core
//! bases, mixins, custom entries and foreign key detection.

use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::fixtures::{address_body, blok, compose_bloks, person_body};
use crate::compose::{compose, CompositionError, EntityGroup};
use crate::core::{method, ClassBody, DeclarationRegistry, EntryDescriptor, FieldDescriptor, RelationshipDescriptor};

fn text(value: &JsonValue) -> &str {
    value.as_str().unwrap_or_default()
}

#[test]
fn test_reopened_model_merges_fields_and_methods() {
    let b1 = blok("b1", &[], |r| {
        r.declare(
            "Model",
            "Model.X",
            ClassBody::new()
                .field(FieldDescriptor::integer("id").primary_key())
                .field(FieldDescriptor::string("a"))
                .method("describe", method(|_, _| Ok(json!("b1")))),
        )?;
        Ok(())
    });
    let b2 = blok("b2", &["b1"], |r| {
        r.declare(
            "Model",
            "Model.X",
            ClassBody::new()
                .field(FieldDescriptor::string("b"))
                .method(
                    "describe",
                    method(|call, args| {
                        let inner = call.call_super(args)?;
                        Ok(json!(format!("b2+{}", text(&inner))))
                    }),
                ),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b1, b2]).unwrap();
    let x = set.model("Model.X").unwrap();
    let names: Vec<&str> = x.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "a", "b"]);
    assert_eq!(x.origin("a"), Some("b1"));
    assert_eq!(x.origin("b"), Some("b2"));
    assert_eq!(x.bloks, vec!["b1", "b2"]);
    assert_eq!(x.invoke("describe", JsonValue::Null).unwrap(), json!("b2+b1"));
}

#[test]
fn test_core_base_method_reaches_every_model() {
    let core = blok("base", &[], |r| {
        r.add_core(
            "Base",
            ClassBody::new().method("kind", method(|call, _| Ok(json!(call.path().to_string())))),
        )?;
        r.declare("Model", "Model.Address", address_body())?;
        r.declare("Model", "Model.Person", person_body())?;
        Ok(())
    });

    let set = compose_bloks(&[core]).unwrap();
    for path in ["Model.Address", "Model.Person"] {
        let entity = set.model(path).unwrap();
        assert_eq!(entity.invoke("kind", JsonValue::Null).unwrap(), json!(path));
        assert_eq!(entity.mro.last().map(String::as_str), Some("Core.Base@base"));
    }
}

#[test]
fn test_one2many_uses_foreign_key_inherited_from_mixin() {
    let b = blok("b", &[], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        r.declare(
            "Mixin",
            "Mixin.Located",
            ClassBody::new().field(FieldDescriptor::integer("address_id").foreign_key("Model.Address", "id")),
        )?;
        r.declare(
            "Model",
            "Model.Shop",
            ClassBody::new()
                .inherit("Mixin.Located")
                .field(FieldDescriptor::integer("id").primary_key()),
        )?;
        r.declare(
            "Model",
            "Model.Address",
            ClassBody::new().relationship(RelationshipDescriptor::one2many("shops", "Model.Shop")),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b]).unwrap();
    let shops = set.model("Model.Address").unwrap().relationship("shops").unwrap();
    assert_eq!(shops.join.len(), 1);
    assert_eq!(shops.join[0].local, "id");
    assert_eq!(shops.join[0].remote, "address_id");
    assert_eq!(
        shops.join_description("address", "shop"),
        "shop.address_id == address.id"
    );
    // mixins are composed but never table-backed
    assert!(set.entity("Mixin.Located").is_some());
    assert!(set.model("Mixin.Located").is_none());
}

#[test]
fn test_string_reference_resolved_after_all_bloks() {
    // Person points at Address before any blok declares it
    let first = blok("first", &[], |r| {
        r.declare("Model", "Model.Person", person_body())?;
        Ok(())
    });
    let second = blok("second", &["first"], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        Ok(())
    });
    let set = compose_bloks(&[first, second]).unwrap();
    assert!(set.model("Model.Person").unwrap().has_field("address_id"));

    let alone = blok("alone", &[], |r| {
        r.declare("Model", "Model.Person", person_body())?;
        Ok(())
    });
    match compose_bloks(&[alone]).unwrap_err() {
        CompositionError::UnknownModel { blok, path, reference } => {
            assert_eq!(blok, "alone");
            assert_eq!(path, "Model.Person");
            assert_eq!(reference, "Model.Address");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_ambiguous_foreign_keys_are_all_listed() {
    let b = blok("b", &[], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        r.declare(
            "Model",
            "Model.Person",
            person_body().field(FieldDescriptor::integer("address2_id").foreign_key("Model.Address", "id")),
        )?;
        r.declare(
            "Model",
            "Model.Address",
            ClassBody::new().relationship(RelationshipDescriptor::one2many("persons", "Model.Person")),
        )?;
        Ok(())
    });

    let err = compose_bloks(&[b]).unwrap_err();
    match &err {
        CompositionError::AmbiguousForeignKey {
            blok,
            path,
            relationship,
            candidates,
            ..
        } => {
            assert_eq!(blok, "b");
            assert_eq!(path, "Model.Address");
            assert_eq!(relationship, "persons");
            assert_eq!(candidates, &vec!["address_id".to_string(), "address2_id".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("address_id") && message.contains("address2_id"));
}

#[test]
fn test_explicit_remote_columns_resolve_ambiguity() {
    let b = blok("b", &[], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        r.declare(
            "Model",
            "Model.Person",
            person_body().field(FieldDescriptor::integer("address2_id").foreign_key("Model.Address", "id")),
        )?;
        r.declare(
            "Model",
            "Model.Address",
            ClassBody::new()
                .relationship(RelationshipDescriptor::one2many("persons", "Model.Person").remote_columns(["address2_id"])),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b]).unwrap();
    let persons = set.model("Model.Address").unwrap().relationship("persons").unwrap();
    assert_eq!(persons.join[0].remote, "address2_id");
}

#[test]
fn test_self_referential_one2many() {
    let b = blok("b", &[], |r| {
        r.declare(
            "Model",
            "Model.Test",
            ClassBody::new()
                .field(FieldDescriptor::integer("id").primary_key())
                .field(FieldDescriptor::integer("parent_id").foreign_key("Model.Test", "id"))
                .relationship(RelationshipDescriptor::one2many("children", "Model.Test").inverse("parent")),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b]).unwrap();
    let test = set.model("Model.Test").unwrap();
    let children = test.relationship("children").unwrap();
    assert_eq!(children.join[0].local, "id");
    assert_eq!(children.join[0].remote, "parent_id");

    let parent = test.relationship("parent").unwrap();
    assert!(parent.synthesized);
    assert_eq!(parent.remote.as_str(), "Model.Test");
    assert_eq!(parent.join[0].local, "parent_id");
    assert_eq!(parent.join[0].remote, "id");
}

#[test]
fn test_composite_foreign_key_is_not_ambiguous() {
    let b = blok("b", &[], |r| {
        r.declare(
            "Model",
            "Model.Order",
            ClassBody::new()
                .field(FieldDescriptor::string("code").primary_key())
                .field(FieldDescriptor::integer("year").primary_key().with_autoincrement(false)),
        )?;
        r.declare(
            "Model",
            "Model.Line",
            ClassBody::new()
                .field(FieldDescriptor::integer("id").primary_key())
                .field(FieldDescriptor::integer("order_year").foreign_key("Model.Order", "year"))
                .field(FieldDescriptor::string("order_code").foreign_key("Model.Order", "code")),
        )?;
        r.declare(
            "Model",
            "Model.Order",
            ClassBody::new().relationship(RelationshipDescriptor::one2many("lines", "Model.Line").inverse("order")),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b]).unwrap();
    let lines = set.model("Model.Order").unwrap().relationship("lines").unwrap();
    let pairs: Vec<(&str, &str)> = lines.join.iter().map(|p| (p.local.as_str(), p.remote.as_str())).collect();
    assert_eq!(pairs, vec![("code", "order_code"), ("year", "order_year")]);

    let order = set.model("Model.Line").unwrap().relationship("order").unwrap();
    assert_eq!(order.join.len(), 2);
}

#[test]
fn test_many2one_synthesizes_missing_column() {
    let b = blok("b", &[], |r| {
        r.declare("Model", "Model.Person", ClassBody::new().field(FieldDescriptor::integer("id").primary_key()))?;
        r.declare(
            "Model",
            "Model.Car",
            ClassBody::new()
                .field(FieldDescriptor::integer("id").primary_key())
                .relationship(RelationshipDescriptor::many2one("owner", "Model.Person").inverse("cars")),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b]).unwrap();
    let car = set.model("Model.Car").unwrap();
    let column = car.field("owner_id").unwrap();
    assert!(column.nullable);
    let fk = column.foreign_key.as_ref().unwrap();
    assert_eq!(fk.model.as_str(), "Model.Person");
    assert_eq!(fk.field, "id");

    let cars = set.model("Model.Person").unwrap().relationship("cars").unwrap();
    assert_eq!(cars.join[0].remote, "owner_id");
}

#[test]
fn test_must_be_loaded_entry_without_declarations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let mut registry = DeclarationRegistry::new();
    registry
        .add_entry(EntryDescriptor::custom(
            "Query",
            true,
            Some(Arc::new(move |group: &mut EntityGroup| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert!(group.is_empty());
                Ok(())
            })),
        ))
        .unwrap();
    registry.declare_entry("Report", false, None).unwrap();
    registry.init_blok("b").unwrap();
    registry.declare("Model", "Model.Address", address_body()).unwrap();

    let set = compose(&registry.freeze(), &["b".to_string()]).unwrap();
    let query = set.group("Query").unwrap();
    assert!(query.must_be_loaded);
    assert!(query.is_empty());
    assert!(set.group("Report").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_later_blok_overrides_field_in_place() {
    let b1 = blok("b1", &[], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        Ok(())
    });
    let b2 = blok("b2", &["b1"], |r| {
        r.declare(
            "Model",
            "Model.Address",
            ClassBody::new().field(FieldDescriptor::text("street").required().with_label("Street")),
        )?;
        Ok(())
    });

    let set = compose_bloks(&[b1, b2]).unwrap();
    let address = set.model("Model.Address").unwrap();
    let names: Vec<&str> = address.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "street", "city"]);
    let street = address.field("street").unwrap();
    assert!(!street.nullable);
    assert_eq!(street.label.as_deref(), Some("Street"));
    assert_eq!(address.origin("street"), Some("b2"));
}
