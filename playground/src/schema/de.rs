use crate::schema::error;
use crate::schema::key::Key;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;
use snafu::ensure;
use std::collections::BTreeMap;
use std::fmt;

/// Validates the key ID for each key during deserialization and fails if any don't match.
pub(super) fn deserialize_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    // An inner function that does actual key ID validation:
    // * fails if a key ID doesn't match its contents
    // * fails if there is a duplicate key ID
    // If this passes we insert the entry.
    fn validate_and_insert_entry(
        keyid: String,
        key: Key,
        map: &mut BTreeMap<String, Key>,
    ) -> Result<(), error::Error> {
        let calculated = key.key_id()?;
        ensure!(
            keyid == calculated,
            error::InvalidKeyIdSnafu {
                keyid: keyid.as_str(),
                calculated,
            }
        );
        let keyid_copy = keyid.clone();
        ensure!(
            map.insert(keyid, key).is_none(),
            error::DuplicateKeyIdSnafu { keyid: keyid_copy }
        );
        Ok(())
    }

    // The rest of this is fitting the above function into serde and doing error type conversion.
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = BTreeMap<String, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map")
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: serde::de::MapAccess<'de>,
        {
            let mut map = BTreeMap::new();
            while let Some((keyid, key)) = access.next_entry()? {
                validate_and_insert_entry(keyid, key, &mut map).map_err(M::Error::custom)?;
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(Visitor)
}

/// Deserializes the `_extra` field of a role, dropping the `_type` tag which serde already
/// consumes through the `#[serde(tag = "_type")]` attribute. Without this the tag would be
/// captured twice and serialized twice.
pub(super) fn extra_skip_type<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut map: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
    map.remove("_type");
    Ok(map)
}
