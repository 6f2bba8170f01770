use super::{Association, EntityType, KeyGeneration, Topology};
use crate::core::{DbError, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid");
}

/// Validated metadata for every entity type known to one engine.
///
/// Built once at startup and passed by reference; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MetadataRegistry {
    types: BTreeMap<String, EntityType>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    entities: Vec<EntityType>,
}

impl MetadataRegistry {
    pub fn builder() -> MetadataRegistryBuilder {
        MetadataRegistryBuilder::default()
    }

    pub fn from_types(types: impl IntoIterator<Item = EntityType>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entity_type in types {
            let name = entity_type.name.clone();
            if map.insert(name.clone(), entity_type).is_some() {
                return Err(DbError::InvalidConfiguration(format!(
                    "entity type '{}' registered twice",
                    name
                )));
            }
        }
        let registry = Self { types: map };
        registry.validate()?;
        debug!("metadata registry built with {} entity types", registry.types.len());
        Ok(registry)
    }

    /// Reads `{"entities": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: RegistryDocument = serde_json::from_str(json)?;
        Self::from_types(document.entities)
    }

    pub fn to_json(&self) -> Result<String> {
        let document = RegistryDocument {
            entities: self.types.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| DbError::UnknownEntityType(name.to_string()))
    }

    pub fn association(&self, entity: &str, association: &str) -> Result<&Association> {
        self.entity(entity)?
            .find_association(association)
            .ok_or_else(|| DbError::unknown_association(entity, association))
    }

    pub fn target_of(&self, association: &Association) -> Result<&EntityType> {
        self.entity(&association.target)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    fn validate(&self) -> Result<()> {
        for entity_type in self.types.values() {
            check_identifier(&entity_type.name, "entity type")?;
            check_identifier(&entity_type.key_field, "key field")?;
            if entity_type.embeddable && !entity_type.associations.is_empty() {
                for association in &entity_type.associations {
                    if matches!(
                        association.topology,
                        Topology::InverseForeignKey { .. } | Topology::JoinTable { .. }
                    ) {
                        return Err(invalid(
                            entity_type,
                            association,
                            "an embeddable type has no key of its own to be referenced by",
                        ));
                    }
                }
            }

            let mut seen = HashSet::new();
            for association in &entity_type.associations {
                check_identifier(&association.name, "association")?;
                if !seen.insert(association.name.as_str()) {
                    return Err(invalid(entity_type, association, "declared twice"));
                }
                self.validate_association(entity_type, association)?;
            }
        }
        Ok(())
    }

    fn validate_association(&self, owner: &EntityType, association: &Association) -> Result<()> {
        let target = self.types.get(&association.target).ok_or_else(|| {
            invalid(
                owner,
                association,
                &format!("unknown target type '{}'", association.target),
            )
        })?;

        match &association.topology {
            Topology::Embedded { local_field } => {
                check_identifier(local_field, "embedded field")?;
                if !target.embeddable {
                    return Err(invalid(owner, association, "embedded target must be embeddable"));
                }
            }
            Topology::OwningForeignKey { local_field } => {
                check_identifier(local_field, "foreign key field")?;
                if local_field == &owner.key_field {
                    return Err(invalid(owner, association, "foreign key cannot be the key field"));
                }
            }
            Topology::InverseForeignKey { remote_field } => {
                check_identifier(remote_field, "foreign key field")?;
                if remote_field == &target.key_field {
                    return Err(invalid(owner, association, "foreign key cannot be the target key field"));
                }
            }
            Topology::JoinTable {
                join_type,
                local_field,
                remote_field,
            } => {
                check_identifier(local_field, "join field")?;
                check_identifier(remote_field, "join field")?;
                let join = self.types.get(join_type).ok_or_else(|| {
                    invalid(owner, association, &format!("unknown join type '{}'", join_type))
                })?;
                if join.embeddable {
                    return Err(invalid(owner, association, "join type must be stored"));
                }
                if join.key_generation == KeyGeneration::Assigned {
                    return Err(invalid(
                        owner,
                        association,
                        "join type must use a generated key",
                    ));
                }
                if local_field == remote_field {
                    return Err(invalid(owner, association, "join fields must differ"));
                }
            }
        }

        if !matches!(association.topology, Topology::Embedded { .. }) && target.embeddable {
            return Err(invalid(
                owner,
                association,
                "embeddable targets can only use the embedded topology",
            ));
        }

        if let Some(inverse_name) = &association.inverse_of {
            let inverse = target.find_association(inverse_name).ok_or_else(|| {
                invalid(
                    owner,
                    association,
                    &format!("inverse '{}.{}' does not exist", target.name, inverse_name),
                )
            })?;
            self.validate_pair(owner, association, inverse)?;
        }
        Ok(())
    }

    fn validate_pair(
        &self,
        owner: &EntityType,
        association: &Association,
        inverse: &Association,
    ) -> Result<()> {
        if inverse.target != owner.name {
            return Err(invalid(
                owner,
                association,
                &format!("inverse '{}' targets '{}'", inverse.name, inverse.target),
            ));
        }
        if let Some(back) = &inverse.inverse_of {
            if back != &association.name {
                return Err(invalid(
                    owner,
                    association,
                    &format!("inverse '{}' points back at '{}'", inverse.name, back),
                ));
            }
        }

        match (&association.topology, &inverse.topology) {
            (Topology::OwningForeignKey { .. }, Topology::OwningForeignKey { .. }) => Err(invalid(
                owner,
                association,
                &format!("both sides claim ownership together with '{}'", inverse.name),
            )),
            (Topology::InverseForeignKey { .. }, Topology::InverseForeignKey { .. }) => Err(invalid(
                owner,
                association,
                &format!("neither side owns the link together with '{}'", inverse.name),
            )),
            (
                Topology::InverseForeignKey { remote_field },
                Topology::OwningForeignKey { local_field },
            )
            | (
                Topology::OwningForeignKey { local_field },
                Topology::InverseForeignKey { remote_field },
            ) if remote_field != local_field => Err(invalid(
                owner,
                association,
                &format!(
                    "foreign key '{}' disagrees with '{}' on the inverse side",
                    remote_field, local_field
                ),
            )),
            (
                Topology::JoinTable {
                    join_type,
                    local_field,
                    remote_field,
                },
                Topology::JoinTable {
                    join_type: other_join,
                    local_field: other_local,
                    remote_field: other_remote,
                },
            ) if join_type != other_join || local_field != other_remote || remote_field != other_local => {
                Err(invalid(
                    owner,
                    association,
                    &format!("join table does not mirror '{}'", inverse.name),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Collects entity types before validation.
#[derive(Debug, Default)]
pub struct MetadataRegistryBuilder {
    types: Vec<EntityType>,
}

impl MetadataRegistryBuilder {
    pub fn register(mut self, entity_type: EntityType) -> Self {
        self.types.push(entity_type);
        self
    }

    pub fn build(self) -> Result<MetadataRegistry> {
        MetadataRegistry::from_types(self.types)
    }
}

fn check_identifier(name: &str, what: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbError::InvalidConfiguration(format!(
            "invalid {} name '{}'",
            what, name
        )))
    }
}

fn invalid(owner: &EntityType, association: &Association, message: &str) -> DbError {
    DbError::InvalidConfiguration(format!(
        "association '{}.{}': {}",
        owner.name, association.name, message
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::IncludeTypes;
    use crate::schema::Cardinality;

    fn person() -> EntityType {
        EntityType::new("Person", "id").sequence_key()
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let err = MetadataRegistry::builder()
            .register(person().association(Association::one(
                "passport",
                "Passport",
                Topology::owning("passportId"),
            )))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown target type 'Passport'"));
    }

    #[test]
    fn test_one_to_one_with_two_owners_is_ambiguous() {
        let err = MetadataRegistry::builder()
            .register(person().association(
                Association::one("passport", "Passport", Topology::owning("passportId"))
                    .inverse_of("holder"),
            ))
            .register(
                EntityType::new("Passport", "id").association(
                    Association::one("holder", "Person", Topology::owning("holderId"))
                        .inverse_of("passport"),
                ),
            )
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("both sides claim ownership"));
    }

    #[test]
    fn test_matching_pair_is_accepted() {
        let registry = MetadataRegistry::builder()
            .register(person().association(
                Association::many("pets", "Pet", Topology::inverse("ownerId"))
                    .inverse_of("owner")
                    .cascade(IncludeTypes::ALL),
            ))
            .register(
                EntityType::new("Pet", "id")
                    .sequence_key()
                    .association(Association::one("owner", "Person", Topology::owning("ownerId"))),
            )
            .build()
            .unwrap();
        let pets = registry.association("Person", "pets").unwrap();
        assert_eq!(pets.cardinality, Cardinality::Many);
        assert!(registry.association("Person", "cats").is_err());
    }

    #[test]
    fn test_join_type_needs_generated_key() {
        let err = MetadataRegistry::builder()
            .register(person().association(Association::many(
                "clubs",
                "Club",
                Topology::join_table("Membership", "personId", "clubId"),
            )))
            .register(EntityType::new("Club", "id"))
            .register(EntityType::new("Membership", "id"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("generated key"));
    }

    #[test]
    fn test_embedded_requires_embeddable_target() {
        let err = MetadataRegistry::builder()
            .register(person().association(Association::many(
                "addresses",
                "Address",
                Topology::embedded("addresses"),
            )))
            .register(EntityType::new("Address", "label"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must be embeddable"));
    }

    #[test]
    fn test_invalid_identifier() {
        let err = MetadataRegistry::builder()
            .register(EntityType::new("Bad Name", "id"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid entity type name"));
    }

    #[test]
    fn test_registry_from_json() {
        let json = serde_json::json!({
            "entities": [
                {
                    "name": "Order",
                    "key_field": "id",
                    "key_generation": "sequence",
                    "version_field": "version",
                    "associations": [{
                        "name": "lines",
                        "target": "LineItem",
                        "cardinality": "many",
                        "topology": {"kind": "inverse_foreign_key", "remote_field": "orderId"},
                        "default_policy": ["ALL"]
                    }]
                },
                {"name": "LineItem", "key_field": "id", "key_generation": "sequence"}
            ]
        });
        let registry = MetadataRegistry::from_json(&json.to_string()).unwrap();
        let order = registry.entity("Order").unwrap();
        assert_eq!(order.version_field.as_deref(), Some("version"));
        assert_eq!(order.associations[0].default_policy, IncludeTypes::ALL);
        assert_eq!(
            order.associations[0].topology,
            Topology::inverse("orderId")
        );

        let round_trip = MetadataRegistry::from_json(&registry.to_json().unwrap()).unwrap();
        assert_eq!(round_trip.entity("Order").unwrap(), order);
    }
}
