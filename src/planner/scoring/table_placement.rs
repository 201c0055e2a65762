use crate::elements::{Engine, EngineSet};
use crate::settings::PlannerSettings;

const HOURS_PER_MONTH: f64 = 720.0;

/// Storage cost in USD per hour of keeping a table of `size_mb` on `engine`. Warehouse storage is part of its
/// instance price; the OLTP engine's shared storage is charged once regardless of replicas.
pub fn storage_cost(engine: Engine, size_mb: f64, settings: &PlannerSettings) -> f64 {
    let usd_per_mb_month = match engine {
        Engine::Serverless => settings.serverless.object_storage_usd_per_mb_per_month,
        Engine::OltpRow if settings.oltp_row.io_optimized => settings.oltp_row.io_opt_usd_per_mb_per_month,
        Engine::OltpRow => settings.oltp_row.regular_usd_per_mb_per_month,
        Engine::Warehouse => 0.0,
    };

    size_mb * usd_per_mb_month / HOURS_PER_MONTH
}

/// Hourly storage cost of a table placed on every engine in `locations`.
pub fn placement_storage_cost(locations: EngineSet, size_mb: f64, settings: &PlannerSettings) -> f64 {
    locations.iter().map(|e| storage_cost(e, size_mb, settings)).sum()
}

/// One-time cost and duration of copying a table onto newly added engines.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct TableMovement {
    pub cost: f64,
    pub time_s: f64,
}

impl TableMovement {
    pub const NONE: Self = Self { cost: 0.0, time_s: 0.0 };
}

impl std::ops::AddAssign for TableMovement {
    fn add_assign(&mut self, rhs: Self) {
        self.cost += rhs.cost;
        self.time_s += rhs.time_s;
    }
}

const EXTRACT_PREFERENCE: [Engine; 3] = [Engine::OltpRow, Engine::Serverless, Engine::Warehouse];

fn extract_rate(engine: Engine, settings: &PlannerSettings) -> f64 {
    match engine {
        Engine::OltpRow => settings.oltp_row.extract_rate_mb_per_s,
        Engine::Warehouse => settings.warehouse.extract_rate_mb_per_s,
        Engine::Serverless => settings.serverless.extract_rate_mb_per_s,
    }
}

fn load_rate(engine: Engine, settings: &PlannerSettings) -> f64 {
    match engine {
        Engine::OltpRow => settings.oltp_row.load_rate_mb_per_s,
        Engine::Warehouse => settings.warehouse.load_rate_mb_per_s,
        Engine::Serverless => settings.serverless.load_rate_mb_per_s,
    }
}

/// Movement of a table from `curr` to `next`. Removing a copy is free. The table is extracted once from the cheapest
/// existing source and loaded into each added engine; serverless reads and writes are charged as scans.
pub fn table_movement(curr: EngineSet, next: EngineSet, size_mb: f64, settings: &PlannerSettings) -> TableMovement {
    let added = next.difference(curr);
    if added.is_empty() {
        return TableMovement::NONE;
    }

    let scan_price = settings.serverless.usd_per_mb_scanned;
    let mut movement = TableMovement::NONE;

    if let Some(source) = EXTRACT_PREFERENCE.iter().copied().find(|e| curr.contains(*e)) {
        movement.time_s += size_mb / extract_rate(source, settings);
        if source == Engine::Serverless {
            movement.cost += size_mb * scan_price;
        }
    }

    for engine in added.iter() {
        movement.time_s += size_mb / load_rate(engine, settings);
        if engine == Engine::Serverless {
            movement.cost += size_mb * scan_price;
        }
    }

    movement
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_storage_cost_per_engine() {
        let mut settings = PlannerSettings::default();
        assert_relative_eq!(storage_cost(Engine::Warehouse, 7200.0, &settings), 0.0);
        assert_relative_eq!(storage_cost(Engine::Serverless, 7200.0, &settings), 7200.0 * 0.000023 / 720.0);
        assert_relative_eq!(storage_cost(Engine::OltpRow, 7200.0, &settings), 0.001);

        settings.oltp_row.io_optimized = true;
        assert_relative_eq!(storage_cost(Engine::OltpRow, 7200.0, &settings), 0.00225);

        let both = placement_storage_cost(EngineSet::of([Engine::OltpRow, Engine::Warehouse]), 7200.0, &settings);
        assert_relative_eq!(both, 0.00225);
    }

    #[test]
    fn test_movement_charged_only_for_added_engines() {
        let settings = PlannerSettings::default();
        let a = EngineSet::single(Engine::OltpRow);
        let ab = EngineSet::of([Engine::OltpRow, Engine::Warehouse]);

        let grow = table_movement(a, ab, 100.0, &settings);
        assert_relative_eq!(grow.time_s, 100.0 / 10.0 + 100.0 / 10.0);
        assert_relative_eq!(grow.cost, 0.0);

        assert_eq!(table_movement(ab, a, 100.0, &settings), TableMovement::NONE);
        assert_eq!(table_movement(ab, ab, 100.0, &settings), TableMovement::NONE);
    }

    #[test]
    fn test_movement_through_serverless_is_scanned() {
        let settings = PlannerSettings::default();
        let from = EngineSet::of([Engine::Serverless, Engine::Warehouse]);
        let to = EngineSet::ALL;
        let actual = table_movement(from, to, 1000.0, &settings);
        assert_relative_eq!(actual.cost, 1000.0 * 5e-6);
        assert_relative_eq!(actual.time_s, 200.0);

        let actual = table_movement(EngineSet::single(Engine::Warehouse), EngineSet::ALL, 1000.0, &settings);
        assert_relative_eq!(actual.cost, 1000.0 * 5e-6);
        assert_relative_eq!(actual.time_s, 300.0);

        // newly created table: nothing to extract from
        let fresh = table_movement(EngineSet::EMPTY, EngineSet::single(Engine::Warehouse), 1000.0, &settings);
        assert_relative_eq!(fresh.time_s, 100.0);
    }
}
