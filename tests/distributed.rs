//! Multi-rank scenarios run on an in-process cluster.

use angio_common::{AngioParams, Point};
use angio_engine::checkpoint::load_agents;
use angio_engine::sources::sources_in_circle_points;
use angio_engine::tip_cells::prune_conflicts;
use angio_engine::{
    Agent, AngioError, Communicator, GridFunction, GridMesh, LocalCluster, SourceCell, SourceMap,
    TipCell, TipCellManager,
};
use std::sync::Arc;

fn params() -> AngioParams {
    AngioParams {
        dim: 2,
        dt: 1.0,
        n_steps: 5,
        seed: 11,
        t_c: 0.1,
        g_m: 0.001,
        g_max: 0.05,
        r_c: 2.0,
        chi: 10.0,
        alpha_p: 1.0,
        t_p: 1.0,
        phi_th: 0.5,
        phi_min: -1.0,
        phi_max: 1.0,
        min_tipcell_distance: 5.0,
        source_r_c: 2.0,
        t_s: 1.0,
        t_min: 0.0,
        d: Some(4.0),
    }
}

fn slab(comm: &dyn Communicator, width: f64, cells: usize) -> Arc<GridMesh> {
    Arc::new(GridMesh::rectangle(
        Point::new2(0.0, 0.0),
        Point::new2(width, width),
        cells,
        cells,
        comm.rank(),
        comm.size(),
    ))
}

fn manager(comm: &dyn Communicator, mesh: &Arc<GridMesh>, initial: Vec<TipCell>) -> TipCellManager {
    TipCellManager::new(comm, Arc::clone(mesh), &params(), initial).unwrap()
}

// Vessel on the left, angiogenic factor rising to the right.
fn fields(mesh: &Arc<GridMesh>) -> (GridFunction, GridFunction) {
    let c =
        GridFunction::interpolate(Arc::clone(mesh), |p| if p.x() < 10.0 { 1.0 } else { -1.0 });
    let af = GridFunction::interpolate(Arc::clone(mesh), |p| 0.2 + 0.01 * p.x());
    (c, af)
}

#[test]
fn every_rank_holds_the_same_tip_cells() {
    let results = LocalCluster::run(3, |comm| {
        let mesh = slab(&comm, 60.0, 60);
        let (mut c, af) = fields(&mesh);
        let mut manager = manager(&comm, &mesh, Vec::new());
        for step in 0..5 {
            manager.step(&comm, &mut c, &af, step).unwrap();
        }

        let registry = manager.registry();
        let consistent_local = registry
            .agents()
            .all(|tc| registry.local_ids().contains(&tc.id()) == registry.is_local(tc.position()));
        let listing: Vec<(String, Vec<f64>)> = manager
            .tip_cells()
            .map(|tc| (tc.id().to_string(), tc.position().coords().to_vec()))
            .collect();
        (listing, consistent_local)
    });

    let (first, _) = &results[0];
    assert!(!first.is_empty());
    for (listing, consistent_local) in &results {
        assert_eq!(listing, first);
        assert!(consistent_local);
    }
}

#[test]
fn activation_skips_sites_near_an_existing_tip_cell() {
    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 30.0, 30);
        // Two vessel vertices: (13, 10) is 3 away from the tip cell, (20, 10) is 10 away.
        let c = GridFunction::interpolate(Arc::clone(&mesh), |p| {
            let at = |x: f64, y: f64| p.x() == x && p.y() == y;
            if at(13.0, 10.0) || at(20.0, 10.0) { 1.0 } else { 0.0 }
        });
        let (_, af) = fields(&mesh);
        let initial = vec![TipCell::new(Point::new2(10.0, 10.0), 2.0, 0)];
        let mut manager = manager(&comm, &mesh, initial);
        let activated = manager.activate_tip_cell(&comm, &c, &af, 1).unwrap();
        let created: Vec<Vec<f64>> = manager
            .tip_cells()
            .filter(|tc| Some(tc.id()) == activated)
            .map(|tc| tc.position().coords().to_vec())
            .collect();
        (manager.len(), created)
    });
    for (len, created) in results {
        assert_eq!(len, 2);
        assert_eq!(created, vec![vec![20.0, 10.0]]);
    }
}

#[test]
fn no_candidate_means_no_new_cell() {
    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 40.0, 40);
        // No vessel anywhere.
        let c = GridFunction::interpolate(Arc::clone(&mesh), |_| -1.0);
        let (_, af) = fields(&mesh);
        let mut manager = manager(&comm, &mesh, Vec::new());
        let activated = manager.activate_tip_cell(&comm, &c, &af, 0).unwrap();
        (activated, manager.len())
    });
    assert_eq!(results, vec![(None, 0), (None, 0)]);
}

#[test]
fn crowded_middle_cell_is_inhibited() {
    // A and C are far enough apart; B conflicts with both.
    let positions = [Point::new2(0.0, 0.0), Point::new2(3.0, 0.0), Point::new2(6.0, 0.0)];
    assert_eq!(prune_conflicts(&positions, 5.0), vec![1]);
}

#[test]
fn circle_of_sources_is_shared_between_ranks() {
    let points = sources_in_circle_points(&Point::new2(150.0, 150.0), 50.0, 5.0);
    assert_eq!(points.len(), 62);

    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 300.0, 100);
        let map = SourceMap::new(&*mesh, &points, 4.0).unwrap();
        let coords = |sc: &SourceCell| sc.position().coords().to_vec();
        let global: Vec<Vec<f64>> = map.global_source_cells().map(coords).collect();
        let local: Vec<Vec<f64>> = map.local_source_cells().map(coords).collect();
        (global, local)
    });

    assert_eq!(results[0].0, results[1].0);
    assert_eq!(results[0].0.len(), 62);
    for point in &results[0].0 {
        assert!(results.iter().any(|(_, local)| local.contains(point)));
    }
}

#[test]
fn random_sources_agree_across_ranks() {
    let results = LocalCluster::run(3, |comm| {
        let mesh = slab(&comm, 30.0, 30);
        let map = SourceMap::random(&comm, &mesh, 8, 2.0, 5, |p| p.x() > 12.0).unwrap();
        map.global_source_cells().map(|sc| sc.position().coords().to_vec()).collect::<Vec<_>>()
    });
    assert_eq!(results[0].len(), 8);
    assert!(results.iter().all(|r| r == &results[0]));
    assert!(results[0].iter().all(|p| p[0] > 12.0));
}

#[test]
fn checkpoint_written_by_the_root_restores_moved_cells() {
    let path =
        std::env::temp_dir().join(format!("angio-distributed-{}.msgpack", std::process::id()));
    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 40.0, 40);
        let (_, af) = fields(&mesh);
        let initial = vec![
            TipCell::new(Point::new2(5.0, 5.0), 2.0, 0),
            TipCell::new(Point::new2(30.0, 20.0), 2.0, 3),
        ];
        let mut manager = manager(&comm, &mesh, initial);
        manager.move_tip_cells(&comm, &af).unwrap();
        manager.save_tip_cells(&comm, &path).unwrap();
        manager.tip_cells().cloned().collect::<Vec<_>>()
    });

    let loaded: Vec<TipCell> = load_agents(&path).unwrap();
    assert_eq!(loaded, results[0]);
    assert_eq!(loaded.len(), 2);
    // Moved by chi * grad(af) = 0.1 along x, so the identity no longer matches the position.
    assert!((loaded[1].position().x() - 30.1).abs() < 1e-9);
    assert_eq!(loaded[1].origin(), &Point::new2(30.0, 20.0));
    assert_eq!(loaded[1].id(), TipCell::new(Point::new2(30.0, 20.0), 2.0, 3).id());
    std::fs::remove_file(&path).ok();
}

#[test]
fn failed_root_write_fails_every_rank() {
    let path = std::env::temp_dir()
        .join(format!("angio-missing-dir-{}", std::process::id()))
        .join("tip_cells.json");
    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 20.0, 20);
        let mut manager = manager(&comm, &mesh, Vec::new());
        let first = manager.save_incremental_tip_cells(&comm, &path, 0);
        let second = manager.save_incremental_tip_cells(&comm, &path, 1);
        (
            matches!(first, Err(AngioError::Io(_))),
            matches!(first, Err(AngioError::RootFailed(_))),
            second.is_err(),
        )
    });
    assert_eq!(results, vec![(true, false, true), (false, true, true)]);
}

#[test]
fn lateral_inhibition_leaves_spaced_cells_on_every_rank() {
    let crowded = [
        Point::new2(10.0, 10.0),
        Point::new2(12.0, 10.0),
        Point::new2(14.0, 10.0),
        Point::new2(19.0, 21.0),
        Point::new2(21.0, 21.0),
        Point::new2(30.0, 30.0),
        Point::new2(33.0, 30.0),
    ];
    let results = LocalCluster::run(2, |comm| {
        let mesh = slab(&comm, 40.0, 40);
        let (_, af) = fields(&mesh);
        let initial: Vec<TipCell> = crowded.iter().map(|p| TipCell::new(*p, 2.0, 0)).collect();
        let mut manager = manager(&comm, &mesh, initial);
        let removed = manager.revert_tip_cells(&comm, &af).unwrap();
        let survivors: Vec<Point> = manager.tip_cells().map(|tc| *tc.position()).collect();
        (removed.len(), survivors)
    });

    let (removed, survivors) = &results[0];
    assert!(*removed >= 3);
    assert_eq!(removed + survivors.len(), crowded.len());
    for (i, a) in survivors.iter().enumerate() {
        for b in &survivors[i + 1..] {
            assert!(a.distance(b) >= params().min_tipcell_distance);
        }
    }
    assert!(results.iter().all(|r| r == &results[0]));
}
