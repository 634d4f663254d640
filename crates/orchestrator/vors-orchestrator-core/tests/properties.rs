use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::sample::Index;
use vors_orchestrator::{
    BufferKind, CameraModel, KeyframeId, RenderEvent, Session, SessionConfig,
};
use vors_test_fixtures::{KeyframeScript, P3pScript, ScriptedTracker, TrackerScript};

fn script(nb_frames: usize, first: usize, later: &BTreeMap<usize, usize>) -> TrackerScript {
    let mut keyframes = vec![KeyframeScript {
        frame: 0,
        scalars: first,
    }];
    keyframes.extend(
        later
            .iter()
            .map(|(&frame, &scalars)| KeyframeScript { frame, scalars }),
    );
    TrackerScript {
        camera: CameraModel::Fr1,
        nb_frames,
        keyframes,
        forced_scalars: 6,
        velocity: [0.1, 0.2, 0.3],
        fps: 30.0,
        p3p: P3pScript::default(),
        fail_at: None,
    }
}

fn loaded(script: TrackerScript) -> Session<ScriptedTracker> {
    let mut session = Session::new(SessionConfig {
        nb_particles: 10_000,
        initial_particles: 4,
        initial_camera_frames: 2,
        ..SessionConfig::default()
    })
    .expect("valid config");
    session
        .load_dataset(ScriptedTracker::new(script), CameraModel::Fr1)
        .expect("dataset loads");
    session
}

fn track_all(session: &mut Session<ScriptedTracker>) {
    while session.track(false).expect("track ok").pose.is_some() {}
}

proptest! {
    #[test]
    fn end_valid_is_monotonic_and_bounded(
        nb_frames in 2usize..60,
        first in 1usize..30,
        later in prop::collection::btree_map(1usize..60, 0usize..30, 0..8),
        forces in prop::collection::vec(any::<bool>(), 60),
    ) {
        let mut session = loaded(script(nb_frames, first, &later));
        let capacity = session.timeline().unwrap().points().capacity();
        let mut previous = session.end_valid();
        for force in forces {
            session.track(force).expect("track ok");
            let end_valid = session.end_valid();
            prop_assert!(end_valid >= previous);
            prop_assert!(end_valid <= capacity);
            previous = end_valid;
        }

        let sections = session.timeline().unwrap().points().sections();
        for section in sections {
            prop_assert!(section.start <= section.end);
        }
        for pair in sections.windows(2) {
            prop_assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn reset_lands_on_the_old_section_start(
        nb_frames in 2usize..60,
        first in 1usize..30,
        later in prop::collection::btree_map(1usize..60, 0usize..30, 1..8),
        pick in any::<Index>(),
    ) {
        let mut session = loaded(script(nb_frames, first, &later));
        track_all(&mut session);
        let reached = session.timeline().unwrap().points().keyframe_count();
        prop_assume!(reached >= 2);

        let target = KeyframeId(1 + pick.index(reached - 1));
        let old_start = session.timeline().unwrap().points().section(target).unwrap().start;
        session.take_render_events();

        session.restart_from(KeyframeId(0), target).expect("restart ok");
        let events = session.take_render_events();
        prop_assert_eq!(
            &events[0],
            &RenderEvent::Extent { buffer: BufferKind::Points, end: old_start }
        );
        let section = session.timeline().unwrap().points().section(target).unwrap();
        prop_assert_eq!(section.start, old_start);
    }

    #[test]
    fn restart_then_retrack_is_reproducible(
        nb_frames in 2usize..60,
        first in 1usize..30,
        later in prop::collection::btree_map(1usize..60, 0usize..30, 1..8),
        pick in any::<Index>(),
    ) {
        let mut session = loaded(script(nb_frames, first, &later));
        track_all(&mut session);
        let reached = session.timeline().unwrap().points().keyframe_count();
        prop_assume!(reached >= 2);
        let end_valid = session.end_valid();
        let last = session.last_tracked_frame();

        let target = KeyframeId(1 + pick.index(reached - 1));
        session.restart_from(KeyframeId(0), target).expect("restart ok");
        track_all(&mut session);

        prop_assert_eq!(session.end_valid(), end_valid);
        prop_assert_eq!(session.last_tracked_frame(), last);
        prop_assert_eq!(session.timeline().unwrap().points().keyframe_count(), reached);
    }
}
