use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tiny_skia::Pixmap;

use gaze_experiment::renderer::ExperimentRenderer;
use gaze_experiment::screen::{FixationType, Screen};
use gaze_experiment::ExperimentConfig;

const STIMULUS: &str = "This is an example stimulus. We can easily show text on the screen. \
                        We can change the font, the size and other settings.";

/// Renderer plus a back buffer, with the glyph cache warmed by one pass.
fn prepare(width: u32, height: u32, screen: &Screen) -> (ExperimentRenderer, Pixmap) {
    let config = ExperimentConfig::default();
    let mut renderer = ExperimentRenderer::new(width, height, &config).unwrap();
    let mut pixmap = Pixmap::new(width, height).unwrap();
    renderer.render_screen(&mut pixmap, screen).unwrap();
    (renderer, pixmap)
}

pub fn bench_render_screen(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_screen");
    group
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2));

    let mut fixation = Screen::new();
    fixation.draw_fixation(FixationType::Cross, None, 12.0, None);

    let mut text = Screen::new();
    text.draw_text(STIMULUS, 22.0);

    let mut color = Screen::with_background([45, 45, 150]);
    color.draw_text("Press 'space', 'a', 'b' or 'c' to continue.", 22.0);

    for (name, screen) in [("fixation", &fixation), ("text", &text), ("color", &color)] {
        for (width, height) in [(1280u32, 720u32), (1536, 864)] {
            let (mut renderer, mut pixmap) = prepare(width, height, screen);
            group.bench_with_input(
                BenchmarkId::new(name, format!("{width}x{height}")),
                screen,
                |b, screen| {
                    b.iter(|| {
                        renderer
                            .render_screen(black_box(&mut pixmap), black_box(screen))
                            .unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .confidence_level(0.95)
        .noise_threshold(0.02)
        .significance_level(0.05);
    targets = bench_render_screen
}

criterion_main!(benches);
