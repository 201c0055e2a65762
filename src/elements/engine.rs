use std::fmt;

use itertools::Itertools;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The heterogeneous engines a blueprint distributes tables and queries across.
#[derive(
    Debug,
    Display,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Row-oriented OLTP engine: a writer plus optional read replicas.
    OltpRow,
    /// MPP warehouse cluster.
    Warehouse,
    /// Serverless query engine over object storage; has no provisioning.
    Serverless,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::OltpRow, Engine::Warehouse, Engine::Serverless];
    pub const STATEFUL: [Engine; 2] = [Engine::OltpRow, Engine::Warehouse];

    pub const fn bitmap_value(&self) -> u8 {
        match self {
            Self::OltpRow => 0b001,
            Self::Warehouse => 0b010,
            Self::Serverless => 0b100,
        }
    }

    /// Column of this engine in per-query prediction arrays.
    pub const fn index(&self) -> usize {
        match self {
            Self::OltpRow => 0,
            Self::Warehouse => 1,
            Self::Serverless => 2,
        }
    }

    pub const fn is_provisioned(&self) -> bool {
        !matches!(self, Self::Serverless)
    }

    pub fn label(&self) -> &'static str {
        self.into()
    }
}

/// Placement bitmap over engines.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct EngineSet(u8);

impl EngineSet {
    pub const EMPTY: EngineSet = EngineSet(0);
    pub const ALL: EngineSet = EngineSet(0b111);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn single(engine: Engine) -> Self {
        Self(engine.bitmap_value())
    }

    pub fn of(engines: impl IntoIterator<Item = Engine>) -> Self {
        engines.into_iter().fold(Self::EMPTY, |acc, e| acc.with(e))
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn contains(&self, engine: Engine) -> bool {
        self.0 & engine.bitmap_value() != 0
    }

    #[must_use]
    pub const fn with(self, engine: Engine) -> Self {
        Self(self.0 | engine.bitmap_value())
    }

    #[must_use]
    pub const fn without(self, engine: Engine) -> Self {
        Self(self.0 & !engine.bitmap_value())
    }

    pub fn insert(&mut self, engine: Engine) -> bool {
        let before = *self;
        *self = self.with(engine);
        before != *self
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Engines in `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns the engine if exactly one is present.
    pub fn sole(&self) -> Option<Engine> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Engine> + '_ {
        Engine::iter().filter(move |e| self.contains(*e))
    }
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.iter().map(|e| e.label()).join(", "))
    }
}

impl From<Engine> for EngineSet {
    fn from(engine: Engine) -> Self {
        Self::single(engine)
    }
}

impl FromIterator<Engine> for EngineSet {
    fn from_iter<T: IntoIterator<Item = Engine>>(iter: T) -> Self {
        Self::of(iter)
    }
}

impl Serialize for EngineSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for engine in self.iter() {
            seq.serialize_element(&engine)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for EngineSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EngineSetVisitor;

        impl<'de> Visitor<'de> for EngineSetVisitor {
            type Value = EngineSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of engine names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut result = EngineSet::EMPTY;
                while let Some(engine) = seq.next_element::<Engine>()? {
                    result.insert(engine);
                }
                Ok(result)
            }
        }

        deserializer.deserialize_seq(EngineSetVisitor)
    }
}
