//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - contract categories shared by every crate
//! - simulated rigs driven through `Device` and `MultiDeviceSynchronizer`
//! - recorded (playback) rigs with exact timestamp scripts
//! - configuration file to running rig

#[cfg(test)]
mod contract_tests {
    use contracts::{ContractError, StreamFault, StreamKind};

    #[test]
    fn test_error_categories() {
        assert!(ContractError::config_parse("x").is_configuration());
        assert!(ContractError::missing_sync_cable("A", "no sync-out").is_configuration());
        assert!(ContractError::DeviceCountMismatch {
            devices: 2,
            configs: 1
        }
        .is_configuration());
        assert!(!ContractError::Cancelled.is_configuration());
        assert!(
            !ContractError::from(StreamFault::new(StreamKind::Color, "lost")).is_configuration()
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::time::Duration;

    use contracts::{
        Capture, ColorResolution, ContractError, DepthMode, DeviceConfiguration, Image,
        ImageFormat, StreamKind, WiredSyncMode,
    };
    use ingestion::{MockCamera, PlaybackSource, SyncLine};
    use sync_engine::{
        CancelToken, Device, MultiDeviceSynchronizer, SyncEngineConfig, SyncOptions,
    };

    const PERIOD_USEC: u64 = 33_333;

    fn camera_config(mode: WiredSyncMode, subordinate_delay: u32) -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ImageFormat::ColorBgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            synchronized_images_only: true,
            wired_sync_mode: mode,
            subordinate_delay_off_master_usec: subordinate_delay,
            ..Default::default()
        }
    }

    fn color_only(mode: WiredSyncMode) -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ImageFormat::ColorBgra32,
            color_resolution: ColorResolution::R720p,
            wired_sync_mode: mode,
            ..Default::default()
        }
    }

    fn fast(camera: MockCamera) -> MockCamera {
        camera.configure(|c| c.frame_interval = Some(Duration::from_millis(2)))
    }

    fn options() -> SyncOptions {
        SyncOptions::default()
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Simulated rig: MockCamera -> Device (pairing) -> MultiDeviceSynchronizer
    #[test]
    fn test_e2e_mock_rig_converges() {
        let line = SyncLine::new();
        let devices = vec![
            Device::open(fast(MockCamera::subordinate("sub-1", &line)), 4).unwrap(),
            Device::open(fast(MockCamera::master("master", &line)), 4).unwrap(),
            Device::open(fast(MockCamera::subordinate("sub-2", &line)), 4).unwrap(),
        ];

        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();
        assert_eq!(sync.serials(), ["master", "sub-1", "sub-2"]);

        sync.start_cameras(&[
            camera_config(WiredSyncMode::Master, 0),
            camera_config(WiredSyncMode::Subordinate, 160),
            camera_config(WiredSyncMode::Subordinate, 320),
        ])
        .unwrap();

        let mut last_reference = None;
        for _ in 0..10 {
            let synced = sync.get_synchronized_captures(false, &options()).unwrap();
            assert_eq!(synced.captures.len(), 3);

            let master_ts = synced.master().unwrap().color_timestamp_usec().unwrap();
            assert_eq!(synced.report.reference_timestamp_usec, master_ts);
            assert!(last_reference.is_none_or(|last| master_ts > last));
            last_reference = Some(master_ts);

            for (index, delay) in [(1usize, 160u64), (2, 320)] {
                let capture = &synced.captures[index];
                assert_eq!(capture.image_count(), 2, "paired color and depth expected");
                assert_eq!(capture.color_timestamp_usec(), Some(master_ts + delay));
                let alignment = synced.report.alignments[index].unwrap();
                assert_eq!(alignment.error_usec, 0);
            }
        }

        sync.stop_cameras();
        assert!(!sync.is_started());
    }

    /// Comparing on depth with a declared depth delay
    #[test]
    fn test_e2e_depth_comparison_with_depth_delay() {
        let line = SyncLine::new();
        let devices = vec![
            Device::open(fast(MockCamera::master("master", &line)), 4).unwrap(),
            Device::open(fast(MockCamera::subordinate("sub", &line)), 4).unwrap(),
        ];
        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();

        let mut sub = camera_config(WiredSyncMode::Subordinate, 200);
        sub.depth_delay_off_color_usec = -100;
        sync.start_cameras(&[camera_config(WiredSyncMode::Master, 0), sub])
            .unwrap();

        for _ in 0..5 {
            let synced = sync.get_synchronized_captures(true, &options()).unwrap();
            let master_ts = synced.report.reference_timestamp_usec;
            assert!(synced.report.compared_depth);
            assert_eq!(
                synced.captures[1].depth_ir_timestamp_usec(),
                Some(master_ts + 100)
            );
        }
    }

    /// Lossy rig: the master skips color frames and one subordinate skips depth
    /// frames, so neither device ever produces a capture for those frames
    #[test]
    fn test_e2e_rig_with_dropped_frames() {
        const MASTER_DROP: u64 = 5;
        const SUB_DROP: u64 = 7;
        let start_usec = ingestion::MockCameraConfig::default().start_usec;

        let line = SyncLine::new();
        let master = fast(MockCamera::master("master", &line))
            .configure(|c| c.drop_color_every = Some(MASTER_DROP as u32));
        let lossy = fast(MockCamera::subordinate("sub-1", &line))
            .configure(|c| c.drop_depth_every = Some(SUB_DROP as u32));
        let devices = vec![
            Device::open(master, 4).unwrap(),
            Device::open(lossy, 4).unwrap(),
            Device::open(fast(MockCamera::subordinate("sub-2", &line)), 4).unwrap(),
        ];

        let config = SyncEngineConfig::default();
        let tolerance = config.tolerance_usec;
        let mut sync = MultiDeviceSynchronizer::new(devices, config).unwrap();
        sync.start_cameras(&[
            camera_config(WiredSyncMode::Master, 0),
            camera_config(WiredSyncMode::Subordinate, 160),
            camera_config(WiredSyncMode::Subordinate, 320),
        ])
        .unwrap();

        let mut refetches = 0;
        let mut last_frame = None;
        for _ in 0..20 {
            let synced = sync.get_synchronized_captures(false, &options()).unwrap();
            let master_ts = synced.report.reference_timestamp_usec;
            let frame = (master_ts - start_usec) / PERIOD_USEC;

            assert_ne!((frame + 1) % MASTER_DROP, 0, "master frame {frame} was skipped");
            assert_ne!((frame + 1) % SUB_DROP, 0, "sub-1 frame {frame} was skipped");
            assert!(last_frame.is_none_or(|last| frame > last));
            last_frame = Some(frame);

            for (index, delay) in [(1usize, 160u64), (2, 320)] {
                let alignment = synced.report.alignments[index].unwrap();
                assert!(alignment.error_usec.abs() <= tolerance);
                assert_eq!(synced.captures[index].image_count(), 2);
                assert_eq!(
                    synced.captures[index].color_timestamp_usec(),
                    Some(master_ts + delay)
                );
            }
            refetches += synced.report.total_refetches();
        }

        // every skipped frame leaves the other devices one capture ahead
        assert!(refetches > 0);
        sync.stop_cameras();
    }

    fn color_capture(ts: u64) -> Capture {
        let image = Image::builder(ImageFormat::ColorBgra32, 4, 2, 16)
            .device_timestamp_usec(ts)
            .build()
            .unwrap();
        Capture::new().with_color(image)
    }

    fn playback(serial: &str, sync_in: bool, sync_out: bool, timestamps: &[u64]) -> PlaybackSource {
        let source = PlaybackSource::new(serial, 16)
            .unwrap()
            .with_sync_jacks(sync_in, sync_out);
        for &ts in timestamps {
            source.load(&color_capture(ts));
        }
        source.finish();
        source
    }

    fn playback_device(source: PlaybackSource) -> Device<PlaybackSource> {
        Device::open(source, 16).unwrap().with_channel_capacity(16)
    }

    /// Subordinate lagging by one stale capture before each in-sync one:
    /// exactly one subordinate re-fetch per result, then end of recording
    #[test]
    fn test_e2e_lagging_subordinate_then_eof() {
        let base = 1_000_000u64;
        let master_ts: Vec<u64> = (0..3).map(|k| base + k * PERIOD_USEC).collect();
        let sub_ts: Vec<u64> = master_ts.iter().flat_map(|&t| [t - 200, t]).collect();

        let devices = vec![
            playback_device(playback("sub", true, false, &sub_ts)),
            playback_device(playback("master", false, true, &master_ts)),
        ];
        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();
        sync.start_cameras(&[
            color_only(WiredSyncMode::Master),
            color_only(WiredSyncMode::Subordinate),
        ])
        .unwrap();

        for &expected in &master_ts {
            let synced = sync.get_synchronized_captures(false, &options()).unwrap();
            assert_eq!(synced.report.reference_timestamp_usec, expected);
            assert_eq!(synced.report.refetches, [0, 1]);
            assert_eq!(synced.report.passes, 2);
            assert_eq!(
                synced.captures[1].color_timestamp_usec(),
                Some(expected)
            );
        }

        let err = sync.get_synchronized_captures(false, &options()).unwrap_err();
        assert!(
            matches!(err, ContractError::CaptureFailed { device_index: 0, .. }),
            "unexpected error: {err}"
        );
    }

    /// Master one frame behind: the master is re-fetched, never the subordinate
    #[test]
    fn test_e2e_lagging_master() {
        let base = 2_000_000u64;
        let master_ts = [base - PERIOD_USEC, base, base + PERIOD_USEC];
        let sub_ts = [base, base + PERIOD_USEC];

        let devices = vec![
            playback_device(playback("master", false, true, &master_ts)),
            playback_device(playback("sub", true, false, &sub_ts)),
        ];
        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();
        sync.start_cameras(&[
            color_only(WiredSyncMode::Master),
            color_only(WiredSyncMode::Subordinate),
        ])
        .unwrap();

        let synced = sync.get_synchronized_captures(false, &options()).unwrap();
        assert_eq!(synced.report.reference_timestamp_usec, base);
        assert_eq!(synced.report.refetches, [1, 0]);

        let synced = sync.get_synchronized_captures(false, &options()).unwrap();
        assert_eq!(synced.report.reference_timestamp_usec, base + PERIOD_USEC);
        assert_eq!(synced.report.total_refetches(), 0);
    }

    /// A required stream failing on the master aborts retrieval with its index
    #[test]
    fn test_e2e_master_stream_failure() {
        let line = SyncLine::new();
        let master = fast(MockCamera::master("master", &line))
            .configure(|c| c.fail_after = Some((StreamKind::DepthIr, 3)));
        let devices = vec![
            Device::open(master, 4).unwrap(),
            Device::open(fast(MockCamera::subordinate("sub", &line)), 4).unwrap(),
        ];
        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();
        sync.start_cameras(&[
            camera_config(WiredSyncMode::Master, 0),
            camera_config(WiredSyncMode::Subordinate, 0),
        ])
        .unwrap();

        let failed = (0..20).find_map(|_| {
            sync.get_synchronized_captures(false, &options())
                .err()
        });
        match failed {
            Some(ContractError::CaptureFailed { device_index, .. }) => assert_eq!(device_index, 0),
            other => panic!("expected master capture failure, got {other:?}"),
        }
        assert!(sync.devices()[0].fault().is_some());
    }

    /// Cancellation from an async task stops a blocking retrieval
    #[tokio::test]
    async fn test_e2e_cancel_from_async_task() {
        // the subordinate waits on a line its master never fires
        let devices = vec![
            Device::open(MockCamera::master("master", &SyncLine::new()), 2).unwrap(),
            Device::open(MockCamera::subordinate("sub", &SyncLine::new()), 2).unwrap(),
        ];
        let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default()).unwrap();
        sync.start_cameras(&[
            color_only(WiredSyncMode::Master),
            color_only(WiredSyncMode::Subordinate),
        ])
        .unwrap();

        let cancel = CancelToken::new();
        let options = SyncOptions::default()
            .with_cancel(cancel.clone())
            .with_poll_interval(Duration::from_millis(10));
        let handle =
            tokio::task::spawn_blocking(move || sync.get_synchronized_captures(false, &options));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("retrieval did not observe cancellation")
            .unwrap();
        assert!(matches!(result, Err(ContractError::Cancelled)));
    }

    /// Configuration file -> loader -> simulated rig
    #[test]
    fn test_e2e_config_to_rig() {
        let rig = r#"
[rig]
name = "bench"
queue_capacity = 4

[[devices]]
serial = "sub"
sync_in = true
[devices.config]
color_resolution = "720p"
color_format = "color_bgra32"
depth_mode = "nfov_unbinned"
synchronized_images_only = true
wired_sync_mode = "subordinate"
subordinate_delay_off_master_usec = 160
[devices.simulation]
jitter_usec = 10

[[devices]]
serial = "master"
sync_out = true
[devices.config]
color_resolution = "720p"
color_format = "color_bgra32"
depth_mode = "nfov_unbinned"
synchronized_images_only = true
wired_sync_mode = "master"

[sync]
tolerance_usec = 50
timeout_ms = 5000
poll_interval_ms = 10
"#;
        let blueprint =
            config_loader::ConfigLoader::load_from_str(rig, config_loader::ConfigFormat::Toml)
                .unwrap();

        let line = SyncLine::new();
        let devices: Vec<_> = blueprint
            .devices
            .iter()
            .map(|d| {
                let camera = fast(MockCamera::new(ingestion::MockCameraConfig {
                    serial: d.serial.clone(),
                    sync_in: d.sync_in,
                    sync_out: d.sync_out,
                    jitter_usec: d.simulation.jitter_usec,
                    ..Default::default()
                }))
                .with_sync_line(&line);
                Device::open(camera, blueprint.rig.queue_capacity).unwrap()
            })
            .collect();

        let config = blueprint.to_sync_engine_config();
        let mut sync = MultiDeviceSynchronizer::new(devices, config.clone()).unwrap();
        let configs: Vec<_> = sync
            .serials()
            .iter()
            .map(|s| {
                blueprint
                    .devices
                    .iter()
                    .find(|d| &d.serial == s)
                    .unwrap()
                    .config
                    .clone()
            })
            .collect();
        sync.start_cameras(&configs).unwrap();

        for _ in 0..5 {
            let synced = sync
                .get_synchronized_captures(false, &SyncOptions::from_config(&config))
                .unwrap();
            let alignment = synced.report.alignments[1].unwrap();
            assert!(alignment.error_usec.abs() <= 50);
        }
        assert!(sync.drift(1).unwrap().updates() >= 5);
    }

    #[test]
    fn test_sample_rig_config_is_valid() {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            include_str!("../../../configs/rig.toml"),
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(blueprint.devices.len(), 3);
        assert_eq!(blueprint.master().unwrap().serial, "000261392712");
        assert_eq!(blueprint.subordinates().count(), 2);
        assert_eq!(blueprint.sync.drift.residual_window, 30);
    }

    #[test]
    fn test_e2e_rig_without_sync_cable_is_rejected() {
        let devices = vec![
            Device::open(MockCamera::standalone("a"), 2).unwrap(),
            Device::open(MockCamera::standalone("b"), 2).unwrap(),
        ];
        let err = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ContractError::MissingSyncCable { .. }));
    }
}
