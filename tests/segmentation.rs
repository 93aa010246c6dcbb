mod common;

use common::init_logger;
use common::synthetic_image::{ramp_volume, square_volume, uniform_volume};
use dicom_watershed::{
    InMemoryLabelmaps, Modifiers, PointerEvent, ProcessType, SessionError, StrokeOutcome,
    ToolConfig, WatershedSession,
};

fn ctrl() -> Modifiers {
    Modifiers {
        ctrl: true,
        ..Modifiers::NONE
    }
}

fn shift() -> Modifiers {
    Modifiers {
        shift: true,
        ..Modifiers::NONE
    }
}

fn alt() -> Modifiers {
    Modifiers {
        alt: true,
        ..Modifiers::NONE
    }
}

fn multi_config(start: usize, end: usize) -> ToolConfig {
    // a small brush keeps the sample inside the bright square
    let mut config = ToolConfig {
        radius: 3,
        ..Default::default()
    };
    config.toggle(true, Some(start), Some(end), None);
    config
}

#[tokio::test]
async fn uniform_slice_gets_one_label_under_the_brush() {
    init_logger();
    let volume = uniform_volume("1.2.3", 1, 4, 4, 42.0);
    let mut store = InMemoryLabelmaps::new();
    let config = ToolConfig {
        radius: 1,
        ..Default::default()
    };
    let mut session = WatershedSession::new(config, &mut store);

    let outcome = session
        .on_pointer_down(PointerEvent::new(2.0, 2.0, 0), &volume, &mut store)
        .await
        .expect("segmentation");
    assert_eq!(
        outcome,
        StrokeOutcome::Written {
            mode: ProcessType::Segment,
            slices: vec![0]
        }
    );

    let labels = &store.slice(0).expect("written").pixel_data;
    let label = labels[2 * 4 + 2];
    assert!(label > 0 && label <= 10, "label {label} out of range");
    assert!(labels.iter().all(|&cell| cell == 0 || cell == label));
    // the image frame is a watershed line
    assert_eq!(labels[0], 0);
    assert_eq!(labels[15], 0);
    assert_eq!(store.redraws, 1);
}

#[tokio::test]
async fn second_pick_repaints_the_first_label() {
    init_logger();
    let volume = uniform_volume("1.2.3", 1, 8, 8, 42.0);
    let mut store = InMemoryLabelmaps::new();
    let config = ToolConfig {
        radius: 1,
        ..Default::default()
    };
    let mut session = WatershedSession::new(config, &mut store);

    let mut buffer = vec![0u16; 64];
    buffer[..16].fill(3);
    buffer[32..48].fill(7);
    buffer[60] = 5;
    session.restore(0, buffer, &volume).expect("restore");

    let pick = PointerEvent::new(3.0, 0.0, 0).with_modifiers(alt());
    let first = session
        .on_pointer_down(pick, &volume, &mut store)
        .await
        .expect("pick");
    assert_eq!(first, StrokeOutcome::Picked(3));
    assert!(store.slices.is_empty());

    let repaint = PointerEvent::new(3.0, 4.0, 0).with_modifiers(alt());
    session
        .on_pointer_down(repaint, &volume, &mut store)
        .await
        .expect("repaint");

    let labels = &store.slice(0).expect("written").pixel_data;
    assert!(!labels.contains(&7));
    assert_eq!(labels.iter().filter(|&&cell| cell == 3).count(), 32);
    assert_eq!(labels[60], 5);
    let segments = store.slice(0).map(|map| map.segments_on_labelmap.clone());
    assert_eq!(segments, Some(vec![0, 3, 5]));
}

#[tokio::test]
async fn series_change_recomputes_the_threshold_band() {
    init_logger();
    let first = ramp_volume("1.1", 1, 8, 1.0, 0.0);
    let second = ramp_volume("2.2", 1, 8, 3.0, 50.0);
    let mut store = InMemoryLabelmaps::new();
    let config = ToolConfig {
        radius: 2,
        ..Default::default()
    };
    let mut session = WatershedSession::new(config, &mut store);

    session
        .on_pointer_down(PointerEvent::new(4.0, 4.0, 0), &first, &mut store)
        .await
        .expect("first stroke");
    let band = session.threshold_band().expect("band");
    assert_eq!(band.min_threshold, 0.0);
    assert_eq!(band.max_threshold, 63.0);

    // same image: the band is reused even though the brush moved
    session
        .on_pointer_down(PointerEvent::new(1.0, 6.0, 0), &first, &mut store)
        .await
        .expect("repeat stroke");
    assert_eq!(session.threshold_band(), Some(band));

    session
        .on_pointer_down(PointerEvent::new(4.0, 4.0, 0), &second, &mut store)
        .await
        .expect("second series");
    let recomputed = session.threshold_band().expect("band");
    assert_ne!(recomputed, band);
    assert_eq!(recomputed.min_threshold, 50.0);
    assert_eq!(recomputed.max_threshold, 50.0 + 3.0 * 63.0);
    assert_eq!(session.state().current_series_id.as_deref(), Some("2.2"));
}

#[tokio::test]
async fn multi_image_stroke_covers_the_inclusive_range() {
    init_logger();
    let volume = square_volume("1.5", 8, 24, 12);
    let mut store = InMemoryLabelmaps::new();
    let mut session = WatershedSession::new(multi_config(2, 4), &mut store);

    let outcome = session
        .on_pointer_down(PointerEvent::new(12.0, 12.0, 3), &volume, &mut store)
        .await
        .expect("segmentation");

    assert_eq!(
        outcome,
        StrokeOutcome::Written {
            mode: ProcessType::Segment,
            slices: vec![2, 3, 4]
        }
    );
    assert_eq!(store.slices.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    let reference = &store.slice(3).expect("active slice").pixel_data;
    assert!(reference[12 * 24 + 12] > 1);
    assert_eq!(reference[2 * 24 + 2], 1);
    for index in [2, 4] {
        assert_eq!(&store.slice(index).expect("stored").pixel_data, reference);
    }
}

#[tokio::test]
async fn erase_by_label_clears_every_slice_in_range() {
    init_logger();
    let volume = square_volume("1.5", 5, 24, 12);
    let mut store = InMemoryLabelmaps::new();
    let mut session = WatershedSession::new(multi_config(0, 4), &mut store);

    session
        .on_pointer_down(PointerEvent::new(12.0, 12.0, 1), &volume, &mut store)
        .await
        .expect("segmentation");
    let square = store.slice(1).expect("stored").pixel_data[12 * 24 + 12];

    let erase = PointerEvent::new(12.0, 12.0, 1).with_modifiers(ctrl());
    session
        .on_pointer_down(erase, &volume, &mut store)
        .await
        .expect("erase");

    assert_eq!(session.state().edit.label_to_erase, Some(square));
    for index in 0..5 {
        let labels = &store.slice(index).expect("stored").pixel_data;
        assert!(!labels.contains(&square), "slice {index} still holds {square}");
        assert_eq!(labels[2 * 24 + 2], 1);
    }
}

#[tokio::test]
async fn shift_drag_erases_the_footprint() {
    init_logger();
    let volume = uniform_volume("1.7", 1, 8, 8, 42.0);
    let mut store = InMemoryLabelmaps::new();
    let config = ToolConfig {
        radius: 1,
        ..Default::default()
    };
    let mut session = WatershedSession::new(config, &mut store);

    session
        .on_pointer_down(PointerEvent::new(3.0, 3.0, 0), &volume, &mut store)
        .await
        .expect("segmentation");
    assert_ne!(store.slice(0).expect("written").pixel_data[3 * 8 + 3], 0);

    for x in [3.0, 4.0] {
        let drag = PointerEvent::new(x, 3.0, 0).with_modifiers(shift());
        let outcome = session
            .on_pointer_drag(drag, &volume, &mut store)
            .await
            .expect("erase");
        assert!(matches!(
            outcome,
            StrokeOutcome::Written {
                mode: ProcessType::EraseManual,
                ..
            }
        ));
    }
    let labels = &store.slice(0).expect("written").pixel_data;
    assert_eq!(labels[3 * 8 + 3], 0);
    assert_eq!(labels[3 * 8 + 4], 0);
    assert_ne!(labels[3 * 8 + 5], 0);
}

#[tokio::test]
async fn non_finite_band_refuses_to_segment() {
    init_logger();
    let volume = uniform_volume("1.8", 1, 8, 8, 42.0);
    let mut store = InMemoryLabelmaps::new();
    let config = ToolConfig {
        min_threshold: Some(f64::NAN),
        ..Default::default()
    };
    let mut session = WatershedSession::new(config, &mut store);

    let result = session
        .on_pointer_down(PointerEvent::new(3.0, 3.0, 0), &volume, &mut store)
        .await;
    assert!(matches!(result, Err(SessionError::DegenerateStatistics)));
    assert!(store.slices.is_empty());
    assert_eq!(store.redraws, 0);
    assert!(!session.in_progress());
}
