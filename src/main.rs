mod demo;

use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use grasp_monitor::{
    PipelineConfig, RuntimeContext, Scene, SceneConfig, entity::ObjectGeometry,
    pipeline::{Coordinator, SyntheticSource},
};

const DEMO_SECONDS: f64 = 4.0;

fn main() -> Result<()> {
    env_logger::init();

    let export_dir = std::env::args().nth(1).map(PathBuf::from);
    let context = RuntimeContext::default();
    let frames = (context.fps * DEMO_SECONDS) as u64;

    let mut scene = Scene::new("demo", SceneConfig::default());
    scene.register_geometry("obj_000005", ObjectGeometry::cuboid(60.0, 190.0, 90.0));
    scene.register_geometry("obj_000004", ObjectGeometry::cuboid(67.0, 102.0, 67.0));
    let scene = scene.into_shared();

    let source = SyntheticSource::new(context).with_limit(frames);
    let coordinator = Coordinator::start(
        source,
        demo::stages(),
        scene.clone(),
        PipelineConfig::default(),
    )?;

    let snapshots = coordinator.snapshots();
    let mut targets: HashMap<String, Option<String>> = HashMap::new();
    while coordinator.is_running() {
        let Ok(snapshot) = snapshots.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        for hand in &snapshot.hands {
            let previous = targets.insert(hand.label.clone(), hand.target.clone());
            if previous.as_ref() == Some(&hand.target) {
                continue;
            }
            match (&hand.target, hand.target_info) {
                (Some(target), Some(info)) => {
                    let name = snapshot
                        .objects
                        .iter()
                        .find(|o| &o.label == target)
                        .map_or(target.as_str(), |o| o.name.as_str());
                    log::info!(
                        "[{:>7.1} ms] {} hand -> {name}: {}",
                        snapshot.timestamp,
                        hand.label,
                        info.display_text()
                    );
                }
                _ => log::info!(
                    "[{:>7.1} ms] {} hand has no target",
                    snapshot.timestamp,
                    hand.label
                ),
            }
        }
    }

    let stats = coordinator.stats();
    coordinator.stop()?;
    log::info!(
        "published {} frames; hand stage took {}, detect {}, estimate {}",
        stats.published,
        stats.hand.processed,
        stats.detect.processed,
        stats.estimate.processed
    );

    if let Some(dir) = export_dir {
        scene
            .lock()
            .export_csv(&dir)
            .with_context(|| format!("failed to export trajectories to {}", dir.display()))?;
    }

    Ok(())
}
