//! Frame loop example
//!
//! A simulated game loop: a door that opens once the player is close, a
//! health watcher, an asset loaded on a worker thread, and an async cutscene.

use frametask::{LoopTiming, TaskRuntime, WaitOptions};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Player {
    x: AtomicI32,
    hp: AtomicU32,
}

fn main() {
    let runtime = TaskRuntime::with_defaults();
    let player = Arc::new(Player {
        x: AtomicI32::new(0),
        hp: AtomicU32::new(100),
    });

    // Door opens when the player walks within range
    let watched = player.clone();
    let door = runtime
        .wait_until(
            move || watched.x.load(Ordering::Relaxed) >= 10,
            WaitOptions::new(),
        )
        .unwrap();

    // Health watcher
    let damaged = runtime
        .wait_until_value_changed(
            Arc::downgrade(&player),
            |p: &Player| p.hp.load(Ordering::Relaxed),
            WaitOptions::from(LoopTiming::LastUpdate),
        )
        .unwrap();

    // Asset loaded off the main thread
    let asset = runtime.completion_source::<String>();
    let loaded = asset.task();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        asset.try_set_result("level_02.map".to_string());
    });

    // Cutscene: wait three frames, then report
    let cutscene_runtime = runtime.clone();
    let cutscene = runtime
        .spawn(LoopTiming::Update, async move {
            for _ in 0..3 {
                if let Ok(frame) = cutscene_runtime.yield_now(LoopTiming::Update) {
                    let _ = frame.await;
                }
            }
            "cutscene finished"
        })
        .unwrap();

    let mut door = Some(door);
    let mut damaged = Some(damaged);
    let mut loaded = Some(loaded);
    let mut cutscene = Some(cutscene);

    for frame in 0..60u32 {
        player.x.fetch_add(1, Ordering::Relaxed);
        if frame == 20 {
            player.hp.fetch_sub(15, Ordering::Relaxed);
        }

        runtime.tick();

        if door.as_ref().map_or(false, |t| t.is_completed()) {
            if let Some(task) = door.take() {
                println!("frame {}: door opened ({:?})", frame, task.get_result());
            }
        }
        if damaged.as_ref().map_or(false, |t| t.is_completed()) {
            if let Some(task) = damaged.take() {
                println!("frame {}: hp changed to {:?}", frame, task.get_result());
            }
        }
        if loaded.as_ref().map_or(false, |t| t.is_completed()) {
            if let Some(task) = loaded.take() {
                println!("frame {}: loaded {:?}", frame, task.get_result());
            }
        }
        if cutscene.as_ref().map_or(false, |t| t.is_completed()) {
            if let Some(task) = cutscene.take() {
                println!("frame {}: {:?}", frame, task.get_result());
            }
        }

        thread::sleep(Duration::from_millis(1));
    }

    println!("{}", runtime.stats());
}
