//! End-to-end scenarios exercising all three drivers on shared fixtures,
//! plus seeded randomised cross-checks of their reported costs.

use pcbs::common::{position_at, sum_of_costs};
use pcbs::{
    CentralisedCbs, Config, DecentralisedCbs, Grid, GridCoord, ProblemInstance, SerialCbs,
    Solution, Solver,
};
use rand::prelude::*;
use rand::rngs::StdRng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn at(x: i32, y: i32) -> GridCoord {
    GridCoord::new(x, y)
}

/// A solution must route every agent start to goal over free cells with
/// unit actions and carry no vertex or edge conflict anywhere on the
/// shared time axis.
fn assert_valid_solution(instance: &ProblemInstance, solution: &Solution) {
    assert_eq!(solution.paths.len(), instance.num_agents());
    assert_eq!(solution.cost, sum_of_costs(&solution.paths));

    for (agent, path) in instance.agents.iter().zip(&solution.paths) {
        assert_eq!(path.first(), Some(&agent.start), "agent {}", agent.id);
        assert_eq!(path.last(), Some(&agent.goal), "agent {}", agent.id);
        for step in path {
            assert!(instance.grid.is_free(*step), "agent {}", agent.id);
        }
        for pair in path.windows(2) {
            let dist = pair[0].manhattan(pair[1]);
            assert!(dist <= 1, "agent {} teleports", agent.id);
        }
    }

    let t_max = solution.paths.iter().map(|p| p.len()).max().unwrap_or(0);
    for t in 0..t_max {
        for a in 0..solution.paths.len() {
            for b in a + 1..solution.paths.len() {
                let pa = position_at(&solution.paths[a], t);
                let pb = position_at(&solution.paths[b], t);
                assert_ne!(pa, pb, "vertex conflict between {a} and {b} at t={t}");
                let pa_next = position_at(&solution.paths[a], t + 1);
                let pb_next = position_at(&solution.paths[b], t + 1);
                assert!(
                    !(pa == pb_next && pb == pa_next),
                    "edge conflict between {a} and {b} at t={t}"
                );
            }
        }
    }
}

fn corridor_swap() -> ProblemInstance {
    ProblemInstance::from_parts(
        Grid::new(5, 1),
        &[at(0, 0), at(4, 0)],
        &[at(4, 0), at(0, 0)],
    )
    .unwrap()
}

fn passing_bay() -> ProblemInstance {
    // A one-cell bay at (2, 1) under an otherwise blocked row lets one
    // agent step aside while the other passes.
    let grid = Grid::from_ascii("5 3\n00000\n11011\n11111\n").unwrap();
    ProblemInstance::from_parts(grid, &[at(0, 0), at(4, 0)], &[at(4, 0), at(0, 0)]).unwrap()
}

fn vertex_dispute() -> ProblemInstance {
    ProblemInstance::from_parts(
        Grid::new(3, 3),
        &[at(0, 1), at(1, 0)],
        &[at(2, 1), at(1, 2)],
    )
    .unwrap()
}

fn double_crossing() -> ProblemInstance {
    // Two independent crossing pairs on a 5x5 grid; the root's children
    // share one cost, giving the centralised driver a plateau to batch.
    ProblemInstance::from_parts(
        Grid::new(5, 5),
        &[at(0, 1), at(1, 0), at(2, 3), at(3, 2)],
        &[at(2, 1), at(1, 2), at(4, 3), at(3, 4)],
    )
    .unwrap()
}

#[test]
fn s1_no_conflict_returns_root() {
    init_tracing();
    let instance = ProblemInstance::from_parts(
        Grid::new(3, 3),
        &[at(0, 0), at(0, 2)],
        &[at(2, 0), at(2, 2)],
    )
    .unwrap();

    let mut solver = SerialCbs::new(instance.clone());
    let solution = solver.solve(&Config::default()).unwrap();
    assert_eq!(solution.cost, 6);
    assert_valid_solution(&instance, &solution);
    // The root is conflict-free: one expansion, nothing generated beyond it.
    assert_eq!(solver.stats().nodes_expanded, 1);
    assert_eq!(solver.stats().conflicts_detected, 0);
}

#[test]
fn s2_corridor_swap_is_unsolvable() {
    init_tracing();
    let mut solver = SerialCbs::new(corridor_swap());
    let config = Config {
        max_nodes_expanded: 500,
        horizon: Some(64),
        ..Config::default()
    };
    assert!(solver.solve(&config).is_none());
    let stats = solver.stats();
    assert!(!stats.solution_found);
    assert!(stats.timed_out);
    assert_eq!(stats.best_cost, -1.0);
}

#[test]
fn s3_passing_bay_resolves_the_swap() {
    init_tracing();
    let instance = passing_bay();
    let mut solver = SerialCbs::new(instance.clone());
    let solution = solver.solve(&Config::default()).unwrap();
    // One agent ducks into the bay for a single extra step.
    assert_eq!(solution.cost, 11);
    assert_valid_solution(&instance, &solution);
    assert!(solver.stats().conflicts_detected >= 1);
    // The root conflict produced two children.
    assert!(solver.stats().nodes_generated >= 3);
}

#[test]
fn s4_vertex_dispute_costs_one_wait() {
    init_tracing();
    let instance = vertex_dispute();
    let mut serial = SerialCbs::new(instance.clone());
    let solution = serial.solve(&Config::default()).unwrap();
    assert_eq!(solution.cost, 7);
    assert_valid_solution(&instance, &solution);

    let mut central = CentralisedCbs::new(instance.clone(), 3);
    let central_solution = central.solve(&Config::default()).unwrap();
    assert_eq!(central_solution.cost, 7);
    assert_valid_solution(&instance, &central_solution);

    let mut decentral = DecentralisedCbs::new(instance.clone(), 2);
    let decentral_solution = decentral.solve(&Config::default()).unwrap();
    assert_eq!(decentral_solution.cost, 7);
    assert_valid_solution(&instance, &decentral_solution);
}

#[test]
fn s5_plateau_batch_matches_serial() {
    init_tracing();
    let instance = double_crossing();

    let mut serial = SerialCbs::new(instance.clone());
    let serial_cost = serial.solve(&Config::default()).unwrap().cost;

    let mut central = CentralisedCbs::new(instance.clone(), 3);
    let solution = central.solve(&Config::default()).unwrap();
    assert_eq!(solution.cost, serial_cost);
    assert_valid_solution(&instance, &solution);
    let stats = central.stats();
    assert!(stats.solution_found);
    assert!(!stats.timed_out);
    assert!(stats.nodes_expanded >= 3);
}

#[test]
fn s6_suboptimality_bound_holds() {
    init_tracing();
    let instance = passing_bay();

    let mut serial = SerialCbs::new(instance.clone());
    let optimal = serial.solve(&Config::default()).unwrap().cost;

    let config = Config {
        suboptimality: 1.5,
        ..Config::default()
    };
    let mut decentral = DecentralisedCbs::new(instance.clone(), 3);
    let solution = decentral.solve(&config).unwrap();
    assert!(solution.cost as f64 <= 1.5 * optimal as f64);
    assert_valid_solution(&instance, &solution);
}

#[test]
fn centralised_with_planner_pool_matches_serial() {
    init_tracing();
    let instance = vertex_dispute();

    let mut serial = SerialCbs::new(instance.clone());
    let serial_cost = serial.solve(&Config::default()).unwrap().cost;

    // 1 coordinator + 2 workers + 2 planner-pool ranks.
    let config = Config {
        low_level_pool: 2,
        ..Config::default()
    };
    let mut central = CentralisedCbs::new(instance.clone(), 5);
    let solution = central.solve(&config).unwrap();
    assert_eq!(solution.cost, serial_cost);
    assert_valid_solution(&instance, &solution);
}

#[test]
fn drivers_agree_at_w1() {
    init_tracing();
    for instance in [passing_bay(), vertex_dispute(), double_crossing()] {
        let mut serial = SerialCbs::new(instance.clone());
        let serial_cost = serial.solve(&Config::default()).unwrap().cost;

        let mut central = CentralisedCbs::new(instance.clone(), 3);
        let central_cost = central.solve(&Config::default()).unwrap().cost;
        assert_eq!(central_cost, serial_cost);

        let mut decentral = DecentralisedCbs::new(instance.clone(), 3);
        let decentral_cost = decentral.solve(&Config::default()).unwrap().cost;
        assert_eq!(decentral_cost, serial_cost);
    }
}

#[test]
fn decentralised_timeout_terminates_every_rank() {
    init_tracing();
    let config = Config {
        timeout_seconds: 0.3,
        horizon: Some(64),
        ..Config::default()
    };
    let mut solver = DecentralisedCbs::new(corridor_swap(), 3);
    assert!(solver.solve(&config).is_none());
    let stats = solver.stats();
    assert!(stats.timed_out);
    assert!(!stats.solution_found);
    assert_eq!(stats.best_cost, -1.0);
}

#[test]
fn centralised_timeout_terminates_every_rank() {
    init_tracing();
    let config = Config {
        timeout_seconds: 0.3,
        horizon: Some(64),
        ..Config::default()
    };
    let mut solver = CentralisedCbs::new(corridor_swap(), 3);
    assert!(solver.solve(&config).is_none());
    assert!(solver.stats().timed_out);
}

#[test]
fn centralised_unsolvable_root_fails_cleanly() {
    init_tracing();
    let mut grid = Grid::new(5, 1);
    grid.set_obstacle(2, 0);
    let instance =
        ProblemInstance::from_parts(grid, &[at(0, 0), at(3, 0)], &[at(1, 0), at(4, 0)]).unwrap();
    let mut solver = CentralisedCbs::new(instance, 3);
    assert!(solver.solve(&Config::default()).is_none());
    assert!(!solver.stats().timed_out);
}

#[test]
fn random_instances_agree_across_drivers() {
    init_tracing();
    let mut rng = StdRng::from_seed([7u8; 32]);

    for round in 0..5 {
        let grid = Grid::new(4, 4);
        let mut cells: Vec<GridCoord> = (0..4)
            .flat_map(|y| (0..4).map(move |x| at(x, y)))
            .collect();
        cells.shuffle(&mut rng);
        let starts: Vec<GridCoord> = cells[..3].to_vec();
        cells.shuffle(&mut rng);
        let goals: Vec<GridCoord> = cells[..3].to_vec();

        let instance = match ProblemInstance::from_parts(grid, &starts, &goals) {
            Ok(instance) => instance,
            // A shuffle may repeat a start as another agent's start; skip.
            Err(_) => continue,
        };

        let mut serial = SerialCbs::new(instance.clone());
        let serial_solution = serial
            .solve(&Config::default())
            .unwrap_or_else(|| panic!("open 4x4 instance {round} should be solvable"));
        assert_valid_solution(&instance, &serial_solution);

        let mut central = CentralisedCbs::new(instance.clone(), 3);
        let central_solution = central.solve(&Config::default()).unwrap();
        assert_eq!(central_solution.cost, serial_solution.cost, "round {round}");
        assert_valid_solution(&instance, &central_solution);

        let mut decentral = DecentralisedCbs::new(instance.clone(), 2);
        let decentral_solution = decentral.solve(&Config::default()).unwrap();
        assert_eq!(
            decentral_solution.cost, serial_solution.cost,
            "round {round}"
        );
        assert_valid_solution(&instance, &decentral_solution);
    }
}
