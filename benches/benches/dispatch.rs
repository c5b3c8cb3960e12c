use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pabridge_rt::trampoline::stream_callback;
use pabridge_rt::{from_fn, registry, CallbackContext, Disposition, SampleFormat, StreamLayout};
use pabridge_sys::PaStreamCallbackTimeInfo;

const TIME_INFO: PaStreamCallbackTimeInfo = PaStreamCallbackTimeInfo {
    inputBufferAdcTime: 0.5,
    currentTime: 0.505,
    outputBufferDacTime: 0.51,
};

fn trampoline_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("trampoline");
    group.measurement_time(Duration::from_secs(5));

    for frames in [64usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("duplex_f32_stereo", frames), &frames, |b, &frames| {
            let context = Arc::new(CallbackContext::new(
                StreamLayout::duplex(SampleFormat::Float32, 2, 2),
                Box::new(from_fn(|buffer| {
                    let input = buffer.input.and_then(|view| view.samples::<f32>());
                    let output = buffer.output.as_mut().and_then(|view| view.samples_mut::<f32>());
                    if let (Some(input), Some(output)) = (input, output) {
                        output.copy_from_slice(input);
                    }
                    Ok(Disposition::Continue)
                })),
                None,
            ));
            let token = registry::global()
                .register(context)
                .expect("register context");
            let input = vec![0.25f32; frames * 2];
            let mut output = vec![0.0f32; frames * 2];

            b.iter(|| unsafe {
                black_box(stream_callback(
                    input.as_ptr().cast(),
                    output.as_mut_ptr().cast(),
                    frames as _,
                    &TIME_INFO,
                    0,
                    token.into_user_data(),
                ))
            });

            unsafe {
                registry::global().unregister(token);
            }
        });
    }

    group.bench_function("orphan_token", |b| {
        b.iter(|| unsafe {
            black_box(stream_callback(
                core::ptr::null(),
                core::ptr::null_mut(),
                64,
                core::ptr::null(),
                0,
                core::ptr::null_mut(),
            ))
        });
    });

    group.finish();
}

criterion_group!(benches, trampoline_dispatch);
criterion_main!(benches);
