//! Structural component identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a component id string is malformed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid component id: {0}")]
pub struct ParseComponentError(String);

/// Identifier of a single attention head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeadId {
    /// Layer index
    pub layer: u32,
    /// Head index within the layer
    pub head: u32,
}

impl HeadId {
    /// Create a head id.
    pub fn new(layer: u32, head: u32) -> Self {
        Self { layer, head }
    }
}

impl std::fmt::Display for HeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}.H{}", self.layer, self.head)
    }
}

/// A structural component of the model that can be scored or pruned.
///
/// The canonical string form (`L3.H5`, `L3.FFN`, `EMB`, `OUT`) is what the
/// always-keep patterns in the analyzer configuration match against, and is
/// also the serialized form so ids can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentId {
    /// Attention head.
    Head {
        /// Layer index
        layer: u32,
        /// Head index
        head: u32,
    },
    /// Feed-forward block of a layer.
    Ffn {
        /// Layer index
        layer: u32,
    },
    /// Token embedding table.
    Embedding,
    /// Final output projection.
    OutputProjection,
}

impl ComponentId {
    /// Head component.
    pub fn head(layer: u32, head: u32) -> Self {
        ComponentId::Head { layer, head }
    }

    /// FFN component.
    pub fn ffn(layer: u32) -> Self {
        ComponentId::Ffn { layer }
    }

    /// Layer this component belongs to, if any.
    pub fn layer(&self) -> Option<u32> {
        match self {
            ComponentId::Head { layer, .. } | ComponentId::Ffn { layer } => Some(*layer),
            ComponentId::Embedding | ComponentId::OutputProjection => None,
        }
    }

    /// Whether this is an attention head.
    pub fn is_head(&self) -> bool {
        matches!(self, ComponentId::Head { .. })
    }

    /// Whether this is an FFN block.
    pub fn is_ffn(&self) -> bool {
        matches!(self, ComponentId::Ffn { .. })
    }

    /// Head id, when this is a head.
    pub fn as_head(&self) -> Option<HeadId> {
        match self {
            ComponentId::Head { layer, head } => Some(HeadId::new(*layer, *head)),
            _ => None,
        }
    }
}

impl From<HeadId> for ComponentId {
    fn from(h: HeadId) -> Self {
        ComponentId::Head { layer: h.layer, head: h.head }
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentId::Head { layer, head } => write!(f, "L{}.H{}", layer, head),
            ComponentId::Ffn { layer } => write!(f, "L{}.FFN", layer),
            ComponentId::Embedding => write!(f, "EMB"),
            ComponentId::OutputProjection => write!(f, "OUT"),
        }
    }
}

impl std::str::FromStr for ComponentId {
    type Err = ParseComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseComponentError(s.to_string());
        match s {
            "EMB" => return Ok(ComponentId::Embedding),
            "OUT" => return Ok(ComponentId::OutputProjection),
            _ => {}
        }
        let rest = s.strip_prefix('L').ok_or_else(err)?;
        let (layer, part) = rest.split_once('.').ok_or_else(err)?;
        let layer: u32 = layer.parse().map_err(|_| err())?;
        if part == "FFN" {
            return Ok(ComponentId::Ffn { layer });
        }
        let head: u32 = part
            .strip_prefix('H')
            .and_then(|h| h.parse().ok())
            .ok_or_else(err)?;
        Ok(ComponentId::Head { layer, head })
    }
}

impl std::str::FromStr for HeadId {
    type Err = ParseComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<ComponentId>()?
            .as_head()
            .ok_or_else(|| ParseComponentError(s.to_string()))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(d)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(ComponentId);
string_serde!(HeadId);
