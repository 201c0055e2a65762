use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::{deserialize_blueprint, serialize_blueprint, AssetRepository, Blueprint};
use crate::error::ManagerError;
use crate::planner::scoring::Score;

/// Phase of the blueprint versioning state machine. One transition cycle runs
/// `Stable -> Transitioning -> TransitionedPreCleanUp -> CleaningUp -> Stable`.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransitionState {
    Stable,
    Transitioning,
    TransitionedPreCleanUp,
    CleaningUp,
}

impl TransitionState {
    pub const fn successor(&self) -> TransitionState {
        match self {
            Self::Stable => Self::Transitioning,
            Self::Transitioning => Self::TransitionedPreCleanUp,
            Self::TransitionedPreCleanUp => Self::CleaningUp,
            Self::CleaningUp => Self::Stable,
        }
    }

    pub const fn is_stable(&self) -> bool {
        matches!(self, Self::Stable)
    }
}

/// Persisted as the JSON array `[version, state, next_version]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, TransitionState, Option<u64>)", into = "(u64, TransitionState, Option<u64>)")]
pub struct BlueprintVersioning {
    pub version: u64,
    pub transition_state: TransitionState,
    pub next_version: Option<u64>,
}

impl BlueprintVersioning {
    pub const fn stable(version: u64) -> Self {
        Self {
            version,
            transition_state: TransitionState::Stable,
            next_version: None,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ManagerError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ManagerError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl From<(u64, TransitionState, Option<u64>)> for BlueprintVersioning {
    fn from((version, transition_state, next_version): (u64, TransitionState, Option<u64>)) -> Self {
        Self { version, transition_state, next_version }
    }
}

impl From<BlueprintVersioning> for (u64, TransitionState, Option<u64>) {
    fn from(v: BlueprintVersioning) -> Self {
        (v.version, v.transition_state, v.next_version)
    }
}

impl fmt::Display for BlueprintVersioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.next_version {
            Some(next) => write!(f, "v{} [{}] -> v{}", self.version, self.transition_state, next),
            None => write!(f, "v{} [{}]", self.version, self.transition_state),
        }
    }
}

/// A blueprint as stored under its version key, together with the score that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintRecord {
    pub blueprint: Blueprint,

    #[serde(default)]
    pub score: Option<Score>,
}

pub fn versioning_key(schema_name: &str) -> String {
    format!("{}/blueprints/versioning", schema_name)
}

pub fn blueprint_key(schema_name: &str, version: u64) -> String {
    format!("{}/blueprints/bp-{:05}", schema_name, version)
}

pub fn legacy_blueprint_key(schema_name: &str) -> String {
    format!("{}.blueprint", schema_name)
}

/// Owns the versioned blueprints of one schema and drives the transition state machine. The versioning record has
/// a single writer: whoever holds this manager.
#[derive(Debug)]
pub struct BlueprintManager {
    schema_name: String,
    assets: Box<dyn AssetRepository>,
    versioning: Option<BlueprintVersioning>,
    current: Option<BlueprintRecord>,
    next: Option<BlueprintRecord>,
}

impl BlueprintManager {
    pub fn new(schema_name: impl Into<String>, assets: Box<dyn AssetRepository>) -> Self {
        Self {
            schema_name: schema_name.into(),
            assets,
            versioning: None,
            current: None,
            next: None,
        }
    }

    /// Bootstraps a schema: persists `blueprint` as version 0 in the `Stable` state.
    #[tracing::instrument(level = "info", skip(assets, blueprint), fields(schema_name=%blueprint.schema_name()))]
    pub async fn initialize_schema(assets: &dyn AssetRepository, blueprint: &Blueprint) -> Result<(), ManagerError> {
        let schema_name = blueprint.schema_name();
        let record = BlueprintRecord { blueprint: blueprint.clone(), score: None };
        assets
            .persist(&blueprint_key(schema_name, 0), &serde_json::to_vec(&record)?)
            .await?;
        assets
            .persist(&versioning_key(schema_name), &BlueprintVersioning::stable(0).serialize()?)
            .await?;
        Ok(())
    }

    pub fn schema_name(&self) -> &str {
        self.schema_name.as_str()
    }

    /// Loads versioning and the blueprints it references, migrating a legacy unversioned blueprint first if no
    /// versioning record exists.
    #[tracing::instrument(level = "info", skip(self), fields(schema_name=%self.schema_name))]
    pub async fn load(&mut self) -> Result<(), ManagerError> {
        let versioning = match self.load_versioning().await? {
            Some(v) => v,
            None => {
                self.upgrade_legacy_format().await?;
                self.load_versioning()
                    .await?
                    .ok_or_else(|| ManagerError::MissingBlueprint(self.schema_name.clone()))?
            },
        };

        self.current = Some(self.load_record(versioning.version).await?);
        self.next = match versioning.next_version {
            Some(next_version) => Some(self.load_record(next_version).await?),
            None => None,
        };
        self.versioning = Some(versioning);
        crate::metrics::ACTIVE_BLUEPRINT_VERSION.set(versioning.version as i64);
        tracing::debug!(%versioning, "loaded blueprint versioning.");
        Ok(())
    }

    /// Re-reads persisted state; tolerates another process having advanced the versioning.
    pub async fn reload(&mut self) -> Result<(), ManagerError> {
        self.load().await
    }

    pub fn get_versioning(&self) -> Result<BlueprintVersioning, ManagerError> {
        self.versioning.ok_or(ManagerError::NotLoaded)
    }

    pub fn get_transition_state(&self) -> Result<TransitionState, ManagerError> {
        self.get_versioning().map(|v| v.transition_state)
    }

    /// The active blueprint and its score. Once physical changes are applied (`TransitionedPreCleanUp` and
    /// `CleaningUp`) the next blueprint is active; otherwise the current one is.
    pub fn get_blueprint_and_score(&self) -> Result<(&Blueprint, Option<&Score>), ManagerError> {
        let versioning = self.get_versioning()?;
        let record = match versioning.transition_state {
            TransitionState::TransitionedPreCleanUp | TransitionState::CleaningUp => self.next.as_ref(),
            TransitionState::Stable | TransitionState::Transitioning => self.current.as_ref(),
        };

        record
            .map(|r| (&r.blueprint, r.score.as_ref()))
            .ok_or(ManagerError::NotLoaded)
    }

    pub fn get_active_blueprint(&self) -> Result<&Blueprint, ManagerError> {
        self.get_blueprint_and_score().map(|(bp, _)| bp)
    }

    pub fn get_current_blueprint(&self) -> Result<&Blueprint, ManagerError> {
        self.current.as_ref().map(|r| &r.blueprint).ok_or(ManagerError::NotLoaded)
    }

    /// The blueprint being transitioned to, if a transition is in flight.
    pub fn get_next_blueprint(&self) -> Option<&Blueprint> {
        self.next.as_ref().map(|r| &r.blueprint)
    }

    /// Persists `blueprint` as the next version, then flips versioning to `Transitioning`. Only legal while `Stable`.
    #[tracing::instrument(level = "info", skip(self, blueprint, score), fields(schema_name=%self.schema_name))]
    pub async fn start_transition(&mut self, blueprint: Blueprint, score: Option<Score>) -> Result<u64, ManagerError> {
        let current = self.get_versioning()?;
        if !current.transition_state.is_stable() {
            return Err(ManagerError::TransitionInProgress(current.transition_state));
        }

        let next_version = current.version + 1;
        let record = BlueprintRecord { blueprint, score };
        self.assets
            .persist(&blueprint_key(&self.schema_name, next_version), &serde_json::to_vec(&record)?)
            .await?;

        let versioning = BlueprintVersioning {
            version: current.version,
            transition_state: TransitionState::Transitioning,
            next_version: Some(next_version),
        };
        self.persist_versioning(versioning).await?;
        self.next = Some(record);
        tracing::info!(%versioning, "started blueprint transition.");
        Ok(next_version)
    }

    /// Advances the state machine one step. Moving to `Stable` promotes the next version to current.
    #[tracing::instrument(level = "info", skip(self), fields(schema_name=%self.schema_name))]
    pub async fn update_transition_state(&mut self, next_state: TransitionState) -> Result<(), ManagerError> {
        let current = self.get_versioning()?;
        if current.transition_state.is_stable() || current.transition_state.successor() != next_state {
            return Err(ManagerError::IllegalTransition { from: current.transition_state, to: next_state });
        }

        let mut versioning = current;
        versioning.transition_state = next_state;
        if next_state.is_stable() {
            let next_version = current.next_version.ok_or_else(|| ManagerError::MissingVersion {
                schema: self.schema_name.clone(),
                version: current.version + 1,
            })?;
            versioning.version = next_version;
            versioning.next_version = None;
        }

        self.persist_versioning(versioning).await?;
        if next_state.is_stable() {
            self.current = self.next.take();
            crate::metrics::ACTIVE_BLUEPRINT_VERSION.set(versioning.version as i64);
        }
        tracing::info!(%versioning, "updated blueprint transition state.");
        Ok(())
    }

    /// Pins `blueprint` as the next stable version, bypassing the transition state machine.
    #[tracing::instrument(level = "warn", skip(self, blueprint, score), fields(schema_name=%self.schema_name))]
    pub async fn force_new_blueprint(&mut self, blueprint: Blueprint, score: Option<Score>) -> Result<u64, ManagerError> {
        let current = self.get_versioning()?;
        let version = current.version.max(current.next_version.unwrap_or(0)) + 1;
        let record = BlueprintRecord { blueprint, score };
        self.assets
            .persist(&blueprint_key(&self.schema_name, version), &serde_json::to_vec(&record)?)
            .await?;

        self.persist_versioning(BlueprintVersioning::stable(version)).await?;
        self.current = Some(record);
        self.next = None;
        crate::metrics::ACTIVE_BLUEPRINT_VERSION.set(version as i64);
        Ok(version)
    }

    /// Removes the versioning record, every versioned blueprint and the legacy key.
    #[tracing::instrument(level = "warn", skip(self), fields(schema_name=%self.schema_name))]
    pub async fn delete_schema(&mut self) -> Result<(), ManagerError> {
        let versioning = match self.versioning {
            Some(v) => Some(v),
            None => self.load_versioning().await?,
        };

        if let Some(v) = versioning {
            let last = v.version.max(v.next_version.unwrap_or(0));
            for version in 0..=last {
                self.assets.delete(&blueprint_key(&self.schema_name, version)).await?;
            }
        }

        self.assets.delete(&versioning_key(&self.schema_name)).await?;
        self.assets.delete(&legacy_blueprint_key(&self.schema_name)).await?;
        self.versioning = None;
        self.current = None;
        self.next = None;
        Ok(())
    }

    async fn persist_versioning(&mut self, versioning: BlueprintVersioning) -> Result<(), ManagerError> {
        self.assets
            .persist(&versioning_key(&self.schema_name), &versioning.serialize()?)
            .await?;
        self.versioning = Some(versioning);
        Ok(())
    }

    async fn load_versioning(&self) -> Result<Option<BlueprintVersioning>, ManagerError> {
        match self.assets.load(&versioning_key(&self.schema_name)).await? {
            None => Ok(None),
            Some(data) => match BlueprintVersioning::deserialize(&data) {
                Ok(v) => Ok(Some(v)),
                Err(err) => {
                    tracing::warn!(error=?err, "unreadable blueprint versioning record - treating as legacy format.");
                    Ok(None)
                },
            },
        }
    }

    async fn load_record(&self, version: u64) -> Result<BlueprintRecord, ManagerError> {
        let data = self
            .assets
            .load(&blueprint_key(&self.schema_name, version))
            .await?
            .ok_or_else(|| ManagerError::MissingVersion { schema: self.schema_name.clone(), version })?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn upgrade_legacy_format(&self) -> Result<(), ManagerError> {
        tracing::info!("detected possible legacy blueprint format - attempting upgrade.");
        let legacy = self
            .assets
            .load(&legacy_blueprint_key(&self.schema_name))
            .await?
            .ok_or_else(|| ManagerError::Migration {
                schema: self.schema_name.clone(),
                reason: "no legacy blueprint found; has this schema been bootstrapped?".to_string(),
            })?;

        let blueprint = deserialize_blueprint(&legacy).map_err(|err| ManagerError::Migration {
            schema: self.schema_name.clone(),
            reason: err.to_string(),
        })?;

        let record = BlueprintRecord { blueprint, score: None };
        self.assets
            .persist(&blueprint_key(&self.schema_name, 0), &serde_json::to_vec(&record)?)
            .await?;
        self.assets
            .persist(&versioning_key(&self.schema_name), &BlueprintVersioning::stable(0).serialize()?)
            .await?;
        tracing::info!("completed upgrading the persisted blueprint format.");
        Ok(())
    }
}

/// Writes `blueprint` under the legacy unversioned key. Only used to stage migrations.
pub async fn persist_legacy_blueprint(
    assets: &dyn AssetRepository, blueprint: &Blueprint,
) -> Result<(), ManagerError> {
    let data = serialize_blueprint(blueprint)?;
    assets.persist(&legacy_blueprint_key(blueprint.schema_name()), &data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::repository::MemoryAssetRepository;
    use crate::blueprint::{Provisioning, RoutingPolicy, Table};
    use crate::elements::{Engine, EngineSet};
    use claim::*;
    use pretty_assertions::assert_eq;
    use serde_test::{assert_tokens, Token};
    use tokio_test::block_on;

    fn blueprint(oltp_nodes: u32) -> Blueprint {
        Blueprint::new(
            "sales",
            vec![Table::new("orders", vec![])],
            maplit::btreemap! { "orders".to_string() => EngineSet::single(Engine::OltpRow) },
            Provisioning::new("db.r6g.large", oltp_nodes),
            Provisioning::new("dc2.large", 0),
            RoutingPolicy::default(),
        )
    }

    #[test]
    fn test_versioning_serde_tokens() {
        let versioning = BlueprintVersioning {
            version: 3,
            transition_state: TransitionState::Transitioning,
            next_version: Some(4),
        };
        assert_tokens(
            &versioning,
            &[
                Token::Tuple { len: 3 },
                Token::U64(3),
                Token::UnitVariant { name: "TransitionState", variant: "transitioning" },
                Token::Some,
                Token::U64(4),
                Token::TupleEnd,
            ],
        );
    }

    #[test]
    fn test_keys() {
        assert_eq!(versioning_key("sales"), "sales/blueprints/versioning");
        assert_eq!(blueprint_key("sales", 7), "sales/blueprints/bp-00007");
        assert_eq!(legacy_blueprint_key("sales"), "sales.blueprint");
    }

    #[test]
    fn test_full_transition_cycle() {
        lazy_static::initialize(&crate::tracing::TEST_TRACING);
        let main_span = tracing::info_span!("test_full_transition_cycle");
        let _main_span_guard = main_span.enter();

        block_on(async {
            let repo = MemoryAssetRepository::default();
            assert_ok!(BlueprintManager::initialize_schema(&repo, &blueprint(1)).await);

            let mut manager = BlueprintManager::new("sales", Box::new(repo.clone()));
            assert!(matches!(assert_err!(manager.get_versioning()), ManagerError::NotLoaded));
            assert_ok!(manager.load().await);
            assert_eq!(assert_ok!(manager.get_versioning()), BlueprintVersioning::stable(0));

            let next_version = assert_ok!(manager.start_transition(blueprint(2), None).await);
            assert_eq!(next_version, 1);
            assert_eq!(assert_ok!(manager.get_active_blueprint()), &blueprint(1));
            assert!(matches!(
                assert_err!(manager.start_transition(blueprint(3), None).await),
                ManagerError::TransitionInProgress(TransitionState::Transitioning)
            ));
            assert!(matches!(
                assert_err!(manager.update_transition_state(TransitionState::Stable).await),
                ManagerError::IllegalTransition { from: TransitionState::Transitioning, to: TransitionState::Stable }
            ));

            assert_ok!(manager.update_transition_state(TransitionState::TransitionedPreCleanUp).await);
            assert_eq!(assert_ok!(manager.get_active_blueprint()), &blueprint(2));
            assert_ok!(manager.update_transition_state(TransitionState::CleaningUp).await);
            assert_ok!(manager.update_transition_state(TransitionState::Stable).await);
            assert_eq!(assert_ok!(manager.get_versioning()), BlueprintVersioning::stable(1));
            assert_none!(manager.get_next_blueprint());

            let mut reloaded = BlueprintManager::new("sales", Box::new(repo.clone()));
            assert_ok!(reloaded.load().await);
            assert_eq!(assert_ok!(reloaded.get_versioning()), BlueprintVersioning::stable(1));
            assert_eq!(assert_ok!(reloaded.get_active_blueprint()), &blueprint(2));
        });
    }

    #[test]
    fn test_reload_mid_transition() {
        block_on(async {
            let repo = MemoryAssetRepository::default();
            assert_ok!(BlueprintManager::initialize_schema(&repo, &blueprint(1)).await);
            let mut manager = BlueprintManager::new("sales", Box::new(repo.clone()));
            assert_ok!(manager.load().await);
            assert_ok!(manager.start_transition(blueprint(2), None).await);
            assert_ok!(manager.update_transition_state(TransitionState::TransitionedPreCleanUp).await);

            let mut other = BlueprintManager::new("sales", Box::new(repo));
            assert_ok!(other.load().await);
            assert_eq!(assert_ok!(other.get_transition_state()), TransitionState::TransitionedPreCleanUp);
            assert_eq!(assert_ok!(other.get_current_blueprint()), &blueprint(1));
            assert_eq!(assert_some!(other.get_next_blueprint()), &blueprint(2));
            assert_eq!(assert_ok!(other.get_active_blueprint()), &blueprint(2));
        });
    }

    #[test]
    fn test_legacy_migration() {
        block_on(async {
            let repo = MemoryAssetRepository::default();
            assert_ok!(persist_legacy_blueprint(&repo, &blueprint(1)).await);

            let mut manager = BlueprintManager::new("sales", Box::new(repo.clone()));
            assert_ok!(manager.load().await);
            assert_eq!(assert_ok!(manager.get_versioning()), BlueprintVersioning::stable(0));
            assert_eq!(assert_ok!(manager.get_active_blueprint()), &blueprint(1));
            assert!(repo.keys().contains(&"sales/blueprints/bp-00000".to_string()));

            let mut missing = BlueprintManager::new("inventory", Box::new(repo.clone()));
            assert!(matches!(assert_err!(missing.load().await), ManagerError::Migration { .. }));

            assert_ok!(repo.persist("broken.blueprint", b"not json").await);
            let mut broken = BlueprintManager::new("broken", Box::new(repo));
            assert!(matches!(assert_err!(broken.load().await), ManagerError::Migration { .. }));
        });
    }

    #[test]
    fn test_force_and_delete() {
        block_on(async {
            let repo = MemoryAssetRepository::default();
            assert_ok!(BlueprintManager::initialize_schema(&repo, &blueprint(1)).await);
            let mut manager = BlueprintManager::new("sales", Box::new(repo.clone()));
            assert_ok!(manager.load().await);

            assert_eq!(assert_ok!(manager.force_new_blueprint(blueprint(4), None).await), 1);
            assert_eq!(assert_ok!(manager.get_versioning()), BlueprintVersioning::stable(1));
            assert_eq!(assert_ok!(manager.get_active_blueprint()), &blueprint(4));

            assert_ok!(manager.delete_schema().await);
            assert!(repo.keys().is_empty());
            assert!(matches!(assert_err!(manager.get_active_blueprint()), ManagerError::NotLoaded));
        });
    }
}
