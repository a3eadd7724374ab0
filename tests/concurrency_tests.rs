// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Concurrency and ring-semantics tests for the MXL core.
//!
//! Covers the publication protocol (seqlock for grains, head index for
//! samples), wrap-around staleness, partial-data signalling, and the
//! blocking waits.

use std::time::Duration;

use mxl_core::{
    ContinuousConfig, DiscreteConfig, Error, FlowConfig, FlowOptions, FlowVariant, GrainReader,
    GrainWriter, Instance, Rational, SamplesReader, SamplesWriter, UNDEFINED_INDEX, VariantConfig,
};
use uuid::Uuid;

struct TestDomainGuard {
    dir: std::path::PathBuf,
}

impl TestDomainGuard {
    fn new(test: &str) -> Self {
        let root = if std::path::Path::new("/dev/shm").is_dir() {
            std::path::PathBuf::from("/dev/shm")
        } else {
            std::env::temp_dir()
        };
        let dir = root.join(format!("mxl_core_conc_tests_{}_{}", test, Uuid::new_v4()));
        std::fs::create_dir_all(dir.as_path()).unwrap();
        Self { dir }
    }
}

impl Drop for TestDomainGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.dir.as_path());
    }
}

fn discrete_flow(
    test: &str,
    history_depth: u64,
    payload_size: u64,
    total_slices: u16,
) -> (Instance, TestDomainGuard, GrainWriter, GrainReader) {
    let guard = TestDomainGuard::new(test);
    let instance = Instance::new(&guard.dir).unwrap();
    let config = FlowConfig {
        id: Uuid::new_v4(),
        edit_rate: Rational::new(25, 1),
        schema: br#"{"format":"urn:x-nmos:format:video"}"#.to_vec(),
        variant: VariantConfig::Discrete(DiscreteConfig {
            grain_payload_size: payload_size,
            history_depth,
            total_slices,
        }),
    };
    let (writer, info, _) = instance.create_flow_writer(&config).unwrap();
    let writer = writer.to_grain_writer().unwrap();
    let reader = instance
        .create_flow_reader(&info.id().to_string())
        .unwrap()
        .to_grain_reader()
        .unwrap();
    (instance, guard, writer, reader)
}

fn continuous_flow(
    test: &str,
    buffer_len: u64,
    channels: u32,
) -> (Instance, TestDomainGuard, SamplesWriter, SamplesReader) {
    let guard = TestDomainGuard::new(test);
    let instance = Instance::new(&guard.dir).unwrap();
    let config = FlowConfig {
        id: Uuid::new_v4(),
        edit_rate: Rational::new(48000, 1),
        schema: br#"{"format":"urn:x-nmos:format:audio"}"#.to_vec(),
        variant: VariantConfig::Continuous(ContinuousConfig {
            channel_count: channels,
            sample_word_size: 4,
            buffer_len,
            options: FlowOptions::default(),
        }),
    };
    let (writer, info, _) = instance.create_flow_writer(&config).unwrap();
    let writer = writer.to_samples_writer().unwrap();
    let reader = instance
        .create_flow_reader(&info.id().to_string())
        .unwrap()
        .to_samples_reader()
        .unwrap();
    (instance, guard, writer, reader)
}

/// A reader racing a single commit must observe either "not ready" or the
/// complete committed payload, never a mixture.
#[test]
fn discrete_publication_is_all_or_nothing() {
    let (_instance, _guard, writer, reader) = discrete_flow("publication", 8, 16, 8);

    let reader_thread = std::thread::spawn(move || {
        let deadline_at = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match reader.get_grain(100) {
                Ok(grain) => {
                    assert_eq!(grain.info.valid_slices, 8);
                    assert_eq!(grain.payload.len(), 16);
                    assert!(
                        grain.payload.iter().all(|&byte| byte == 0xAB),
                        "observed a torn payload: {:?}",
                        grain.payload
                    );
                    return;
                }
                Err(Error::NotReady { .. }) | Err(Error::UnderWrite) => {
                    assert!(
                        std::time::Instant::now() < deadline_at,
                        "grain never became visible"
                    );
                    std::hint::spin_loop();
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
    });

    let mut access = writer.open_grain(100).unwrap();
    access.payload_mut().fill(0xAB);
    access.commit(8).unwrap();
    reader_thread.join().unwrap();
}

/// After the ring wraps, old indices are stale and the newest are readable.
#[test]
fn wrap_around_staleness() {
    let (_instance, _guard, writer, reader) = discrete_flow("wrap", 4, 16, 1);

    for index in 0..8u64 {
        let mut access = writer.open_grain(index).unwrap();
        access.payload_mut().fill(index as u8);
        access.commit(1).unwrap();
    }
    assert_eq!(reader.get_runtime_info().head_index, 7);

    // Index 3 lives in the same slot as index 7 and has been overwritten.
    assert!(matches!(reader.get_grain(3), Err(Error::Stale)));

    let grain = reader.get_grain(7).unwrap();
    assert!(grain.payload.iter().all(|&byte| byte == 7));

    // Indices 4..=7 are the retained history.
    for index in 4..8u64 {
        assert!(reader.get_grain(index).is_ok(), "index {index}");
    }

    // The future is not ready yet.
    assert!(matches!(
        reader.get_grain(8),
        Err(Error::NotReady { .. })
    ));
}

/// Committed grains cannot be rewritten at the same or an older index.
#[test]
fn open_grain_refuses_to_rewrite_history() {
    let (_instance, _guard, writer, _reader) = discrete_flow("rewrite", 8, 16, 1);

    writer.open_grain(100).unwrap().commit(1).unwrap();
    assert!(matches!(writer.open_grain(100), Err(Error::Stale)));
    // 92 maps to the same slot (100 - 8).
    assert!(matches!(writer.open_grain(92), Err(Error::Stale)));
    // A newer index for the same slot is fine.
    writer.open_grain(108).unwrap().commit(1).unwrap();
}

/// A canceled session publishes nothing readable.
#[test]
fn canceled_grain_is_not_readable() {
    let (_instance, _guard, writer, reader) = discrete_flow("cancel", 8, 16, 1);

    let mut access = writer.open_grain(5).unwrap();
    access.payload_mut().fill(0xEE);
    access.cancel();

    assert!(matches!(reader.get_grain(5), Err(Error::NotReady { .. })));
    assert_eq!(reader.get_runtime_info().head_index, UNDEFINED_INDEX);

    // Dropping without commit behaves like cancel.
    {
        let _access = writer.open_grain(6).unwrap();
    }
    assert!(matches!(reader.get_grain(6), Err(Error::NotReady { .. })));
}

/// Slice-level visibility: a partial commit releases waiters with a low
/// enough admission threshold while keeping the session open.
#[test]
fn partial_commits_release_matching_waiters() {
    let (_instance, _guard, writer, reader) = discrete_flow("slices", 8, 64, 8);
    let now = mxl_core::time::current_time();

    let mut access = writer.open_grain(0).unwrap();
    access.payload_mut()[..32].fill(0x11);
    access.commit_partial(4).unwrap();

    // Four slices are visible; waiting for at most four succeeds at once.
    reader.wait_for_grain(0, 4, now + 1_000_000_000).unwrap();
    let grain = reader.get_grain(0).unwrap();
    assert_eq!(grain.info.valid_slices, 4);
    assert!(!grain.info.is_complete());

    // Waiting for all eight runs into the deadline.
    assert!(matches!(
        reader.wait_for_grain(0, 8, mxl_core::time::current_time() + 50_000_000),
        Err(Error::Timeout)
    ));

    access.payload_mut()[32..].fill(0x22);
    access.commit(8).unwrap();
    let grain = reader.get_grain(0).unwrap();
    assert!(grain.info.is_complete());
}

/// Continuous partial reads report the available prefix: with 1024 samples
/// committed, requesting (500, 1024) leaves 524 available.
#[test]
fn continuous_partial_read_reports_available_count() {
    let (_instance, _guard, writer, reader) = continuous_flow("partial", 48000 * 4, 2);

    let access = writer.open_samples(0, 1024).unwrap();
    access.commit().unwrap();
    assert_eq!(reader.get_runtime_info().head_index, 1023);

    match reader.get_samples(500, 1024) {
        Err(Error::NotReady { available }) => assert_eq!(available, 524),
        other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
    }

    let samples = reader.get_samples(500, 500).unwrap();
    assert_eq!(samples.sample_count(), 500);
    let (frag1, frag2) = samples.channel_data(0).unwrap();
    assert_eq!(frag1.len(), 500 * 4);
    assert!(frag2.is_empty());

    // Entirely future spans have nothing available.
    match reader.get_samples(2000, 100) {
        Err(Error::NotReady { available }) => assert_eq!(available, 0),
        other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
    }
}

/// Sample batches crossing the ring boundary come back as two fragments per
/// channel, and overwritten spans go stale.
#[test]
fn continuous_wrap_fragments_and_staleness() {
    // 12000-sample capacity per channel (48000 bytes / 4).
    let (_instance, _guard, writer, reader) = continuous_flow("wrapfrag", 48000 * 4, 2);

    let mut access = writer.open_samples(0, 11990).unwrap();
    for ch in 0..2 {
        let (frag1, frag2) = access.channel_data_mut(ch).unwrap();
        frag1.fill(0x11);
        assert!(frag2.is_empty());
    }
    access.commit().unwrap();

    // The next batch crosses the 12000-sample boundary: 10 + 10.
    let mut access = writer.open_samples(11990, 20).unwrap();
    for ch in 0..2 {
        let (frag1, frag2) = access.channel_data_mut(ch).unwrap();
        assert_eq!(frag1.len(), 10 * 4);
        assert_eq!(frag2.len(), 10 * 4);
        frag1.fill(0x22);
        frag2.fill(0x33);
    }
    access.commit().unwrap();

    let samples = reader.get_samples(11990, 20).unwrap();
    let (frag1, frag2) = samples.channel_data(1).unwrap();
    assert!(frag1.iter().all(|&byte| byte == 0x22));
    assert!(frag2.iter().all(|&byte| byte == 0x33));

    // Samples 0..=9 were overwritten by the wrap.
    assert!(matches!(reader.get_samples(0, 10), Err(Error::Stale)));
    // Sample 10 onward is still within the retained window.
    assert!(reader.get_samples(10, 10).is_ok());
}

/// The writer cursor only moves forward: committed spans cannot be
/// rewritten, and oversized batches are contract errors.
#[test]
fn open_samples_validates_range() {
    let (_instance, _guard, writer, _reader) = continuous_flow("validate", 4096 * 4, 1);

    writer.open_samples(0, 1024).unwrap().commit().unwrap();
    assert!(matches!(writer.open_samples(1023, 10), Err(Error::Stale)));
    assert!(matches!(writer.open_samples(500, 10), Err(Error::Stale)));
    assert!(matches!(
        writer.open_samples(2000, 0),
        Err(Error::BadArg)
    ));
    assert!(matches!(
        writer.open_samples(2000, 4097),
        Err(Error::BadArg)
    ));
    // A forward gap is allowed.
    writer.open_samples(2000, 100).unwrap().commit().unwrap();
}

/// Typed f32 audio round-trips through the byte fragments.
#[test]
fn float_samples_roundtrip() {
    let (_instance, _guard, writer, reader) = continuous_flow("floats", 4096 * 4, 2);

    let mut access = writer.open_samples(0, 256).unwrap();
    for ch in 0..access.channels() {
        let (frag1, _) = access.channel_data_mut(ch).unwrap();
        let samples: &mut [f32] = bytemuck::cast_slice_mut(frag1);
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = (i as f32) / 256.0 + ch as f32;
        }
    }
    access.commit().unwrap();

    let data = reader.get_samples(0, 256).unwrap();
    let (frag1, _) = data.channel_data(1).unwrap();
    let samples: &[f32] = bytemuck::cast_slice(frag1);
    assert_eq!(samples.len(), 256);
    assert_eq!(samples[0], 1.0);
    assert_eq!(samples[255], 255.0 / 256.0 + 1.0);
}

/// Blocking waits resolve as soon as data lands and respect the deadline
/// otherwise.
#[test]
fn waits_block_until_data_or_deadline() {
    let (_instance, _guard, writer, reader) = discrete_flow("waits", 8, 16, 1);

    // Nothing written: the wait must end at the deadline.
    let deadline = mxl_core::time::current_time() + 30_000_000;
    assert!(matches!(
        reader.wait_for_grain(0, 1, deadline),
        Err(Error::Timeout)
    ));

    // A commit from another thread releases the waiter.
    let writer_thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        let mut access = writer.open_grain(0).unwrap();
        access.payload_mut().fill(1);
        access.commit(1).unwrap();
        writer
    });
    let deadline = mxl_core::time::current_time() + 2_000_000_000;
    reader.wait_for_grain(0, 1, deadline).unwrap();
    let writer = writer_thread.join().unwrap();
    drop(writer);

    let runtime = reader.get_runtime_info();
    assert_eq!(runtime.head_index, 0);
    assert_eq!(runtime.variant, FlowVariant::Discrete);
    assert_eq!(runtime.history_depth, 8);
    assert_eq!(runtime.edit_rate, Rational::new(25, 1));
    assert!(runtime.last_write_time > 0);
}

/// Same for continuous flows, via `wait_for_samples`.
#[test]
fn sample_waits_follow_the_head_index() {
    let (_instance, _guard, writer, reader) = continuous_flow("samplewaits", 4096 * 4, 1);

    let deadline = mxl_core::time::current_time() + 30_000_000;
    assert!(matches!(
        reader.wait_for_samples(100, deadline),
        Err(Error::Timeout)
    ));

    let writer_thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        writer.open_samples(0, 128).unwrap().commit().unwrap();
        writer
    });
    let deadline = mxl_core::time::current_time() + 2_000_000_000;
    reader.wait_for_samples(100, deadline).unwrap();
    let _writer = writer_thread.join().unwrap();
}

/// Sustained writing with concurrent validated reads: every accepted
/// payload is internally consistent.
#[test]
fn hammered_ring_never_yields_torn_reads() {
    // Large ring so the concurrent reader is never lapped.
    let (_instance, _guard, writer, reader) = discrete_flow("hammer", 1024, 64, 1);
    const LAST: u64 = 512;

    let reader_thread = std::thread::spawn(move || {
        let mut checked = 0u64;
        loop {
            let head = reader.get_runtime_info().head_index;
            if head == UNDEFINED_INDEX {
                std::hint::spin_loop();
                continue;
            }
            for index in head.saturating_sub(16)..=head {
                if let Ok(grain) = reader.get_grain(index) {
                    let expected = index as u8;
                    assert!(
                        grain.payload.iter().all(|&byte| byte == expected),
                        "torn read at index {index}"
                    );
                    checked += 1;
                }
            }
            if head >= LAST {
                return checked;
            }
        }
    });

    for index in 0..=LAST {
        let mut access = writer.open_grain(index).unwrap();
        access.payload_mut().fill(index as u8);
        access.commit(1).unwrap();
    }
    let checked = reader_thread.join().unwrap();
    assert!(checked > 0);
}
