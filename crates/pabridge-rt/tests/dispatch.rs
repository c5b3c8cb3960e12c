use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pabridge_rt::trampoline::{stream_callback, stream_finished};
use pabridge_rt::{
    from_fn, lifecycle_diagnostics, registry, CallbackContext, CallbackFault, Disposition,
    FinishReason, FinishedHandler, SampleFormat, StatusFlags, StreamCallback, StreamLayout,
    StreamToken, TimingSnapshot,
};
use pabridge_sys::{paAbort, paComplete, paContinue, PaStreamCallbackTimeInfo};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

struct Registered {
    context: Arc<CallbackContext>,
    token: StreamToken,
}

impl Registered {
    fn new(
        layout: StreamLayout,
        callback: impl StreamCallback + 'static,
        finished: Option<FinishedHandler>,
    ) -> Self {
        let context = Arc::new(CallbackContext::new(layout, Box::new(callback), finished));
        let token = registry::global()
            .register(context.clone())
            .expect("register context");
        Self { context, token }
    }

    fn user_data(&self) -> *mut c_void {
        self.token.into_user_data()
    }

    fn run_output(&self, output: &mut [u8], frames: usize, flags: u64) -> i32 {
        let timing = PaStreamCallbackTimeInfo::default();
        unsafe {
            stream_callback(
                std::ptr::null(),
                output.as_mut_ptr().cast(),
                frames as _,
                &timing,
                flags as _,
                self.user_data(),
            )
        }
    }

    fn finish(&self) {
        unsafe { stream_finished(self.user_data()) }
    }
}

impl Drop for Registered {
    fn drop(&mut self) {
        // Tests only drop after their last simulated engine call.
        unsafe {
            registry::global().unregister(self.token);
        }
    }
}

proptest! {
    #[test]
    fn output_view_covers_exactly_the_requested_frames(
        frames in 1usize..2048,
        channels in 1usize..8,
    ) {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = seen.clone();
        let stream = Registered::new(
            StreamLayout::output_only(SampleFormat::Int16, channels),
            from_fn(move |buffer| {
                let output = buffer.output.as_mut().expect("output view");
                seen_in_callback.store(output.frames(), Ordering::SeqCst);
                assert_eq!(output.channels(), channels);
                let samples = output.samples_mut::<i16>().expect("int16 samples");
                for (index, sample) in samples.iter_mut().enumerate() {
                    *sample = index as i16;
                }
                Ok(Disposition::Continue)
            }),
            None,
        );

        let guard_samples = 4;
        let mut native = vec![0x5555i16; frames * channels + guard_samples];
        let code = unsafe {
            stream_callback(
                std::ptr::null(),
                native.as_mut_ptr().cast(),
                frames as _,
                std::ptr::null(),
                0,
                stream.user_data(),
            )
        };

        prop_assert_eq!(code, paContinue);
        prop_assert_eq!(seen.load(Ordering::SeqCst), frames);
        for (index, sample) in native[..frames * channels].iter().enumerate() {
            prop_assert_eq!(*sample, index as i16);
        }
        prop_assert!(native[frames * channels..].iter().all(|sample| *sample == 0x5555));
    }
}

#[test]
fn timing_and_flags_are_copied_verbatim() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Float32, 2),
        from_fn(move |buffer| {
            sink.lock().unwrap().push((buffer.timing, buffer.flags));
            Ok(Disposition::Continue)
        }),
        None,
    );

    let native = PaStreamCallbackTimeInfo {
        inputBufferAdcTime: 10.125,
        currentTime: 10.25,
        outputBufferDacTime: 10.375,
    };
    let mut output = vec![0.0f32; 64 * 2];
    let flags = StatusFlags::OUTPUT_UNDERFLOW | StatusFlags::PRIMING_OUTPUT;
    let code = unsafe {
        stream_callback(
            std::ptr::null(),
            output.as_mut_ptr().cast(),
            64,
            &native,
            flags.bits(),
            stream.user_data(),
        )
    };

    assert_eq!(code, paContinue);
    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let (timing, seen_flags) = captured[0];
    assert_eq!(timing, TimingSnapshot::from_native(&native));
    assert_eq!(timing.to_native(), native);
    assert_eq!(seen_flags, flags);

    let stats = stream.context.stats();
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.frames, 64);
    assert_eq!(stats.output_underflows, 1);
    assert_eq!(stats.priming_buffers, 1);
    assert_eq!(stats.input_overflows, 0);
}

#[test]
fn duplex_input_is_visible_to_the_callback() {
    let stream = Registered::new(
        StreamLayout::duplex(SampleFormat::Float32, 1, 2),
        from_fn(|buffer| {
            let input = buffer.input.expect("input view");
            let input = input.samples::<f32>().expect("f32 input");
            let output = buffer.output.as_mut().expect("output view");
            let output = output.samples_mut::<f32>().expect("f32 output");
            for (frame, sample) in input.iter().enumerate() {
                output[frame * 2] = *sample;
                output[frame * 2 + 1] = -*sample;
            }
            Ok(Disposition::Continue)
        }),
        None,
    );

    let input: Vec<f32> = (0..32).map(|i| i as f32 / 32.0).collect();
    let mut output = vec![0.0f32; 64];
    let code = unsafe {
        stream_callback(
            input.as_ptr().cast(),
            output.as_mut_ptr().cast(),
            32,
            std::ptr::null(),
            0,
            stream.user_data(),
        )
    };

    assert_eq!(code, paContinue);
    for (frame, sample) in input.iter().enumerate() {
        assert_eq!(output[frame * 2], *sample);
        assert_eq!(output[frame * 2 + 1], -*sample);
    }
}

#[test]
fn complete_is_returned_once_and_latched() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Int8, 1),
        from_fn(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if call == 3 {
                Disposition::Complete
            } else {
                Disposition::Continue
            })
        }),
        None,
    );

    let mut output = [0u8; 16];
    let codes: Vec<_> = (0..3).map(|_| stream.run_output(&mut output, 16, 0)).collect();
    assert_eq!(codes, vec![paContinue, paContinue, paComplete]);

    // An engine that keeps calling after COMPLETE must not reach the callback again.
    assert_eq!(stream.run_output(&mut output, 16, 0), paComplete);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stream.context.latched(), Some(Disposition::Complete));
    assert_eq!(stream.context.stats().invocations, 3);
}

#[test]
fn callback_error_aborts_and_is_recorded() {
    let reason = Arc::new(Mutex::new(None));
    let reason_sink = reason.clone();
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Float32, 2),
        from_fn(|buffer| {
            if buffer.frames == 32 {
                anyhow::bail!("decoder underrun at frame {}", buffer.frames);
            }
            Ok(Disposition::Continue)
        }),
        Some(Box::new(move |reason| {
            *reason_sink.lock().unwrap() = Some(reason);
        })),
    );

    let mut output = vec![0u8; 64 * 2 * 4];
    assert_eq!(stream.run_output(&mut output, 64, 0), paContinue);
    assert_eq!(stream.run_output(&mut output, 32, 0), paAbort);
    assert!(stream.context.has_fault());

    stream.finish();
    assert_eq!(*reason.lock().unwrap(), Some(FinishReason::Faulted));
    let fault = stream.context.take_fault().expect("recorded fault");
    assert!(matches!(fault, CallbackFault::Error(_)));
    assert_eq!(
        fault.to_string(),
        "stream callback failed: decoder underrun at frame 32"
    );
}

#[test]
fn callback_panic_does_not_unwind_into_the_engine() {
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Float32, 1),
        from_fn(|_| panic!("filter exploded")),
        None,
    );

    let mut output = vec![0u8; 8 * 4];
    assert_eq!(stream.run_output(&mut output, 8, 0), paAbort);
    assert_eq!(stream.run_output(&mut output, 8, 0), paAbort);
    assert_eq!(stream.context.stats().invocations, 1);

    stream.finish();
    assert_eq!(stream.context.finish_reason(), Some(FinishReason::Faulted));
    let fault = stream.context.take_fault().expect("recorded fault");
    assert_eq!(fault.to_string(), "stream callback panicked: filter exploded");
}

#[test]
fn finished_relay_fires_exactly_once() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Float32, 2),
        from_fn(|_| Ok(Disposition::Continue)),
        Some(Box::new(move |reason| {
            assert_eq!(reason, FinishReason::Stopped);
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    let before = lifecycle_diagnostics().duplicate_finishes;
    stream.finish();
    stream.finish();
    stream.finish();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(stream.context.is_finished());
    assert!(lifecycle_diagnostics().duplicate_finishes >= before + 2);
}

#[test]
fn streams_never_cross_deliver() {
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));
    let a_counter = a_calls.clone();
    let b_counter = b_calls.clone();
    let a = Registered::new(
        StreamLayout::output_only(SampleFormat::UInt8, 1),
        from_fn(move |buffer| {
            a_counter.fetch_add(1, Ordering::SeqCst);
            buffer.output.as_mut().expect("output").fill(0xAAu8);
            Ok(Disposition::Continue)
        }),
        None,
    );
    let b = Registered::new(
        StreamLayout::output_only(SampleFormat::UInt8, 2),
        from_fn(move |buffer| {
            b_counter.fetch_add(1, Ordering::SeqCst);
            buffer.output.as_mut().expect("output").fill(0xBBu8);
            Ok(Disposition::Complete)
        }),
        None,
    );
    assert_ne!(a.token, b.token);

    let mut a_out = [0u8; 32];
    let mut b_out = [0u8; 64];
    for _ in 0..4 {
        assert_eq!(a.run_output(&mut a_out, 32, 0), paContinue);
    }

    assert_eq!(a_calls.load(Ordering::SeqCst), 4);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b.context.stats().invocations, 0);
    assert_eq!(b.context.latched(), None);
    assert!(b_out.iter().all(|byte| *byte == 0));

    assert_eq!(b.run_output(&mut b_out, 32, 0), paComplete);
    assert!(a_out.iter().all(|byte| *byte == 0xAA));
    assert!(b_out.iter().all(|byte| *byte == 0xBB));
    assert_eq!(a.context.latched(), None);
    assert_eq!(a.context.stats().invocations, 4);
}

#[test]
fn unknown_tokens_are_a_safe_abort() {
    let before = lifecycle_diagnostics();
    let mut output = [0x11u8; 16];
    let stale = {
        let stream = Registered::new(
            StreamLayout::output_only(SampleFormat::UInt8, 1),
            from_fn(|_| Ok(Disposition::Continue)),
            None,
        );
        stream.token
    };

    let code = unsafe {
        stream_callback(
            std::ptr::null(),
            output.as_mut_ptr().cast(),
            16,
            std::ptr::null(),
            0,
            stale.into_user_data(),
        )
    };
    assert_eq!(code, paAbort);
    let code = unsafe {
        stream_callback(
            std::ptr::null(),
            output.as_mut_ptr().cast(),
            16,
            std::ptr::null(),
            0,
            std::ptr::null_mut(),
        )
    };
    assert_eq!(code, paAbort);
    unsafe { stream_finished(stale.into_user_data()) };

    assert!(output.iter().all(|byte| *byte == 0x11));
    let after = lifecycle_diagnostics();
    assert!(after.orphan_callbacks >= before.orphan_callbacks + 2);
    assert!(after.orphan_finishes >= before.orphan_finishes + 1);
}

#[test]
fn unaddressable_buffers_abort_without_running_the_callback() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let stream = Registered::new(
        StreamLayout::output_only(SampleFormat::Float32, 2),
        from_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Disposition::Continue)
        }),
        None,
    );
    let mut output = [0x5au8; 8];

    let code = unsafe {
        stream_callback(
            std::ptr::null(),
            output.as_mut_ptr().cast(),
            std::ffi::c_ulong::MAX,
            std::ptr::null(),
            0,
            stream.user_data(),
        )
    };
    assert_eq!(code, paAbort);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stream.context.latched(), Some(Disposition::Abort));
    assert!(output.iter().all(|byte| *byte == 0x5a));

    assert_eq!(stream.run_output(&mut output, 1, 0), paAbort);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn input_only_streams_get_no_output_view() {
    let frames_seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&frames_seen);
    let stream = Registered::new(
        StreamLayout::input_only(SampleFormat::Int16, 2),
        from_fn(move |buffer| {
            assert!(buffer.output.is_none());
            let input = buffer.input.expect("input view");
            assert_eq!(input.frames(), buffer.frames);
            let samples = input.samples::<i16>().expect("int16 samples");
            assert_eq!(samples.len(), buffer.frames * 2);
            record.lock().expect("lock").push((buffer.frames, samples[0]));
            Ok(Disposition::Continue)
        }),
        None,
    );

    for frames in [64usize, 64, 17] {
        let input: Vec<i16> = (0..frames * 2).map(|index| index as i16 + 7).collect();
        let code = unsafe {
            stream_callback(
                input.as_ptr().cast(),
                std::ptr::null_mut(),
                frames as _,
                std::ptr::null(),
                0,
                stream.user_data(),
            )
        };
        assert_eq!(code, paContinue);
    }

    assert_eq!(
        *frames_seen.lock().expect("lock"),
        vec![(64, 7), (64, 7), (17, 7)]
    );
    assert_eq!(stream.context.stats().frames, 145);
}
