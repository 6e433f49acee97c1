use super::*;
use crate::app::adb::testing::FakeTransport;
use crate::app::error::ErrorCode;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Instant;

const PROPS: &str = "[ro.build.version.sdk]: [34]\n\
[ro.build.fingerprint]: [google/panther/panther:14/UQ1A/1:user/release-keys]\n\
[persist.sys.language]: [en]\n\
[ro.product.locale.region]: [US]\n";
const MOUNTS: &str = "/dev/block/dm-0 /system ext4 ro,seclabel,relatime 0 0\n\
/dev/block/sda12 /data f2fs rw,lazytime,nosuid 0 0\n\
proc /proc proc rw,relatime 0 0\n";
const ENV: &str = "PATH=/sbin:/system/bin\nANDROID_DATA=/data\n";

fn scripted_transport() -> Arc<FakeTransport> {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("getprop", PROPS);
    fake.reply("cat /proc/mounts", MOUNTS);
    fake.reply("printenv", ENV);
    fake
}

fn session_for(fake: &Arc<FakeTransport>, serial: &str, state: DeviceState) -> DeviceSession {
    DeviceSession::new(
        DeviceIdentity::from_serial(serial),
        state,
        fake.clone(),
        &SessionConfig::default(),
    )
}

fn local_package(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b"PK\x03\x04fake-apk").unwrap();
    path
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn record_events(session: &DeviceSession, kind: EventKind) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.subscribe(kind, move |event: &SessionEvent| {
        sink.lock().unwrap().push(event.clone())
    });
    seen
}

#[test]
fn online_construction_populates_caches() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    assert_eq!(
        fake.commands(),
        vec!["cat /proc/mounts", "printenv", "getprop"]
    );
    assert_eq!(session.api_level(), Some(34));
    assert_eq!(
        session.build_fingerprint().as_deref(),
        Some("google/panther/panther:14/UQ1A/1:user/release-keys")
    );
    assert_eq!(session.language().as_deref(), Some("en"));
    assert_eq!(session.region().as_deref(), Some("US"));
    assert_eq!(
        session.mount_point("/data").map(|mount| mount.fs_type),
        Some("f2fs".to_string())
    );
    assert_eq!(session.env_var("ANDROID_DATA").as_deref(), Some("/data"));
}

#[test]
fn offline_construction_issues_no_commands() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Offline);
    assert!(fake.commands().is_empty());
    assert!(session.properties().is_empty());
    assert!(session.mount_points().is_empty());
    assert!(session.environment().is_empty());
}

#[test]
fn refreshes_on_non_online_device_leave_caches_untouched() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let properties = session.properties();
    let mounts = session.mount_points();
    let environment = session.environment();
    let issued = fake.commands().len();

    for state in [
        DeviceState::Offline,
        DeviceState::BootLoader,
        DeviceState::Recovery,
        DeviceState::Unauthorized,
    ] {
        session.set_state(state);
        fake.reply("getprop", "[ro.build.version.sdk]: [35]\n");
        assert_eq!(session.refresh_properties(), Refresh::Skipped);
        assert_eq!(session.refresh_mount_points(), Refresh::Skipped);
        assert_eq!(session.refresh_environment(), Refresh::Skipped);
    }

    assert_eq!(fake.commands().len(), issued);
    assert!(Arc::ptr_eq(&properties, &session.properties()));
    assert!(Arc::ptr_eq(&mounts, &session.mount_points()));
    assert!(Arc::ptr_eq(&environment, &session.environment()));
}

#[test]
fn property_refresh_failure_keeps_previous_values() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    fake.fail_shell("getprop", ErrorCode::Protocol, "closed");
    assert_eq!(session.refresh_properties(), Refresh::Failed);
    assert_eq!(session.api_level(), Some(34));
}

#[test]
fn transition_into_online_reruns_eager_refresh_then_notifies() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Offline);
    let events = record_events(&session, EventKind::StateChanged);

    session.set_state(DeviceState::Online);
    assert_eq!(fake.count_commands("getprop"), 1);
    assert_eq!(fake.count_commands("cat /proc/mounts"), 1);
    assert_eq!(fake.count_commands("printenv"), 1);
    assert!(session.is_online());
    assert_eq!(
        *events.lock().unwrap(),
        vec![SessionEvent::StateChanged {
            serial: "R58M123".to_string(),
            previous: DeviceState::Offline,
            current: DeviceState::Online,
        }]
    );

    session.set_state(DeviceState::Online);
    assert_eq!(events.lock().unwrap().len(), 1);
    assert_eq!(fake.count_commands("getprop"), 1);
}

#[test]
fn derived_state_flags_follow_current_state() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Unauthorized);
    assert!(session.is_unauthorized());
    assert!(!session.is_online());
    session.set_state(DeviceState::Recovery);
    assert!(session.is_recovery());
    session.set_state(DeviceState::BootLoader);
    assert!(session.is_bootloader());
    session.set_state(DeviceState::Offline);
    assert!(session.is_offline());
    assert!(!session.is_emulator());
}

#[test]
fn first_property_prefers_earlier_names() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("getprop", "[b]: [from-b]\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    assert_eq!(session.first_property(&["a", "b"]).as_deref(), Some("from-b"));
    assert_eq!(session.first_property(&["a"]), None);

    fake.reply("getprop", "[a]: [from-a]\n[b]: [from-b]\n");
    session.refresh_properties();
    assert_eq!(session.first_property(&["a", "b"]).as_deref(), Some("from-a"));
}

#[test]
fn avd_name_is_emulator_only() {
    let fake = Arc::new(FakeTransport::new());
    let device = session_for(&fake, "R58M123", DeviceState::Offline);
    let err = device.set_avd_name("Pixel_8").unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(device.avd_name(), None);

    let emulator = session_for(&fake, "emulator-5554", DeviceState::Offline);
    assert!(emulator.is_emulator());
    emulator.set_avd_name("Pixel_8_API_34").unwrap();
    assert_eq!(emulator.avd_name().as_deref(), Some("Pixel_8_API_34"));
}

#[test]
fn emulator_picks_up_avd_name_from_properties() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("getprop", "[ro.kernel.qemu.avd_name]: [Tablet_API_33]\n");
    let session = session_for(&fake, "emulator-5556", DeviceState::Online);
    assert_eq!(session.avd_name().as_deref(), Some("Tablet_API_33"));
}

#[test]
fn battery_within_freshness_is_served_from_cache() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply(
        "dumpsys battery",
        "Current Battery Service state:\n  AC powered: false\n  level: 40\n  scale: 100\n",
    );
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    let first = session.battery(Duration::from_secs(60)).unwrap();
    let second = session.battery(Duration::from_secs(60)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.percent(), Some(40));
    assert_eq!(fake.count_commands("dumpsys battery"), 1);
    let call = fake
        .shell_calls()
        .into_iter()
        .find(|call| call.command == "dumpsys battery")
        .unwrap();
    assert_eq!(call.timeout, Some(Duration::from_millis(5_000)));
}

#[test]
fn battery_query_failure_propagates() {
    let fake = Arc::new(FakeTransport::new());
    fake.fail_shell("dumpsys battery", ErrorCode::Timeout, "deadline exceeded");
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let err = session.battery_default().unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
}

#[test]
fn elevated_check_resolves_once() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("su -c", "uid=0(root) gid=0(root)\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    assert!(session.probe_elevated_capability().unwrap());
    assert!(session.probe_elevated_capability().unwrap());
    assert_eq!(fake.count_commands("su -c"), 1);
    assert_eq!(fake.commands().last().map(String::as_str), Some("su -c \"id\""));
    let call = fake.shell_calls().pop().unwrap();
    assert_eq!(call.timeout, None);
}

#[test]
fn elevated_check_treats_refusal_as_sticky_false() {
    for code in [ErrorCode::PermissionDenied, ErrorCode::NotFound] {
        let fake = Arc::new(FakeTransport::new());
        fake.fail_shell("su -c", code, "su: not allowed");
        let session = session_for(&fake, "R58M123", DeviceState::Online);

        assert!(!session.probe_elevated_capability().unwrap());
        fake.reply("su -c", "uid=0(root)\n");
        assert!(!session.probe_elevated_capability().unwrap());
        assert_eq!(fake.count_commands("su -c"), 1);
        assert_eq!(session.elevated_capability(), Capability::Unavailable);
    }
}

#[test]
fn unexpected_elevated_error_leaves_capability_unknown() {
    let fake = Arc::new(FakeTransport::new());
    fake.fail_shell("su -c", ErrorCode::Protocol, "connection reset");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    let err = session.probe_elevated_capability().unwrap_err();
    assert_eq!(err.code, ErrorCode::Protocol);
    assert_eq!(session.elevated_capability(), Capability::Unknown);

    fake.reply("su -c", "uid=0(root)\n");
    assert!(session.probe_elevated_capability().unwrap());
    assert_eq!(fake.count_commands("su -c"), 2);
}

#[test]
fn pending_elevated_check_does_not_block_refreshes() {
    let fake = scripted_transport();
    fake.reply("su -c", "uid=0(root)\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let session = &session;
    fake.hold("su -c");

    std::thread::scope(|scope| {
        let check = scope.spawn(move || session.probe_elevated_capability());
        wait_for("elevated command", || fake.count_commands("su -c") == 1);

        let (done_tx, done_rx) = mpsc::channel();
        scope.spawn(move || {
            let refreshed = session.refresh_properties().is_replaced();
            let _ = done_tx.send(refreshed);
        });
        let refreshed = done_rx.recv_timeout(Duration::from_secs(2));
        fake.release();

        assert_eq!(refreshed, Ok(true), "refresh waited on the elevated command");
        assert!(check.join().unwrap().unwrap());
    });
    assert_eq!(session.elevated_capability(), Capability::Available);
}

#[test]
fn concurrent_refreshes_publish_whole_generations() {
    let fake = scripted_transport();
    fake.reply_with("getprop", |generation| {
        (0..16)
            .map(|index| format!("[gen.slot{index}]: [{generation}]\n"))
            .collect()
    });
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let session = &session;

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(move || {
                for _ in 0..10 {
                    session.refresh_properties();
                }
            });
        }
        scope.spawn(move || {
            for _ in 0..200 {
                let snapshot = session.properties();
                let generations: BTreeSet<&String> = snapshot.values().collect();
                assert_eq!(snapshot.len(), 16);
                assert_eq!(generations.len(), 1, "mixed snapshot: {snapshot:?}");
                std::thread::yield_now();
            }
        });
    });

    assert_eq!(fake.count_commands("getprop"), 41);
    let last = session.properties();
    assert!(last.values().all(|value| value == "40"));
}

#[test]
fn install_success_pushes_installs_and_cleans_up_once() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app-debug.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.reply("pm install", "Performing Streamed Install\nSuccess\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    let report = session.install_package(&apk, false).unwrap();
    assert_eq!(report.remote_path, "/data/local/tmp/app-debug.apk");
    assert_eq!(report.cleanup_error, None);

    let pushes = fake.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].remote_path, "/data/local/tmp/app-debug.apk");
    assert_eq!(pushes[0].mode, 0o644);
    assert_eq!(pushes[0].bytes, b"PK\x03\x04fake-apk".to_vec());
    assert_eq!(
        pushes[0].modified,
        fs::metadata(&apk).unwrap().modified().unwrap()
    );

    assert!(fake
        .commands()
        .contains(&"pm install \"/data/local/tmp/app-debug.apk\"".to_string()));
    assert_eq!(fake.count_commands("rm "), 1);
}

#[test]
fn install_failure_still_cleans_up_once() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app-release.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.reply("pm install", "Failure [INSTALL_FAILED_ALREADY_EXISTS]\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    let err = session.install_package(&apk, true).unwrap_err();
    assert_eq!(err.code, ErrorCode::InstallationFailed);
    assert_eq!(err.error, "INSTALL_FAILED_ALREADY_EXISTS");
    assert_eq!(fake.count_commands("pm install -r"), 1);
    assert_eq!(
        fake.commands().last().map(String::as_str),
        Some("rm \"/data/local/tmp/app-release.apk\"")
    );
    assert_eq!(fake.count_commands("rm "), 1);
}

#[test]
fn install_with_unavailable_transfer_skips_remaining_stages() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.set_sync_available(false);
    let session = session_for(&fake, "R58M123", DeviceState::Offline);

    let err = session.install_package(&apk, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::TransferUnavailable);
    assert!(fake.commands().is_empty());
    assert!(fake.pushes().is_empty());
}

#[test]
fn install_with_failed_push_skips_remaining_stages() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.fail_push(ErrorCode::Protocol, "remote write failed");
    let session = session_for(&fake, "R58M123", DeviceState::Offline);

    let err = session.install_package(&apk, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::Protocol);
    assert_eq!(fake.count_commands("pm "), 0);
    assert_eq!(fake.count_commands("rm "), 0);
}

#[test]
fn install_of_missing_local_file_issues_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let session = session_for(&fake, "R58M123", DeviceState::Offline);

    let err = session
        .install_package(&dir.path().join("missing.apk"), false)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(fake.commands().is_empty());
}

#[test]
fn cleanup_failure_does_not_mask_install_success() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.reply("pm install", "Success\n");
    fake.fail_shell("rm ", ErrorCode::PermissionDenied, "rm: Permission denied");
    let session = session_for(&fake, "R58M123", DeviceState::Offline);

    let report = session.install_package(&apk, false).unwrap();
    assert_eq!(report.cleanup_error.as_deref(), Some("rm: Permission denied"));
    assert_eq!(fake.count_commands("rm "), 1);
}

#[test]
fn install_reports_progress_and_honors_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let apk = local_package(&dir, "app.apk");
    let fake = Arc::new(FakeTransport::new());
    fake.reply("pm install", "Success\n");
    let session = session_for(&fake, "R58M123", DeviceState::Offline);

    let seen = Mutex::new(Vec::new());
    let record = |percent: u8| seen.lock().unwrap().push(percent);
    let cancel = AtomicBool::new(false);
    session
        .install_package_with(
            &apk,
            false,
            Some(&record as &(dyn Fn(u8) + Send + Sync)),
            &cancel,
        )
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![100]);

    cancel.store(true, Ordering::SeqCst);
    let err = session
        .install_package_with(&apk, false, None, &cancel)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
    assert_eq!(fake.count_commands("pm install"), 1);
    assert_eq!(fake.count_commands("rm "), 1);
}

#[test]
fn uninstall_surfaces_device_message() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("pm uninstall", "Success\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    session.uninstall_package("com.example.app").unwrap();
    assert_eq!(
        fake.commands().last().map(String::as_str),
        Some("pm uninstall com.example.app")
    );

    fake.reply("pm uninstall", "Failure [DELETE_FAILED_INTERNAL_ERROR]\n");
    let err = session.uninstall_package("com.example.app").unwrap_err();
    assert_eq!(err.code, ErrorCode::InstallationFailed);
    assert_eq!(err.error, "DELETE_FAILED_INTERNAL_ERROR");
}

#[test]
fn forward_failures_become_false() {
    let fake = Arc::new(FakeTransport::new());
    fake.script_forwards(&[true, false, true, false]);
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    assert!(session.create_forward(8080, 80));
    assert!(!session.create_forward(8081, 81));
    assert!(session.remove_forward(8080));
    assert!(!session.remove_forward(8081));
    assert_eq!(
        fake.forward_calls(),
        vec![
            "R58M123 tcp:8080 tcp:80",
            "R58M123 tcp:8081 tcp:81",
            "R58M123 --remove tcp:8080",
            "R58M123 --remove tcp:8081",
        ]
    );
}

#[test]
fn remount_of_unknown_mount_point_runs_nothing() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let issued = fake.commands().len();

    let err = session.remount("/vendor", false).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    assert_eq!(fake.commands().len(), issued);
}

#[test]
fn remount_issues_mount_and_refreshes_table() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    session.remount("/system", false).unwrap();
    let commands = fake.commands();
    let tail = &commands[commands.len() - 2..];
    assert_eq!(
        tail,
        [
            "mount -o rw,remount -t ext4 /dev/block/dm-0 /system".to_string(),
            "cat /proc/mounts".to_string(),
        ]
    );

    let record = session.mount_point("/data").unwrap();
    fake.fail_shell("cat /proc/mounts", ErrorCode::Protocol, "closed");
    session.remount(&record, true).unwrap();
    assert_eq!(
        fake.count_commands("mount -o ro,remount -t f2fs /dev/block/sda12 /data"),
        1
    );
    assert!(session.mount_point("/system").is_some());
}

#[test]
fn failed_remount_surfaces_error_and_refreshes_table() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    fake.fail_shell(
        "mount -o",
        ErrorCode::Protocol,
        "shell command exited with Some(255): mount: '/system' not in /proc/mounts",
    );
    let refreshes = fake.count_commands("cat /proc/mounts");

    let err = session.remount("/system", false).unwrap_err();
    assert_eq!(err.code, ErrorCode::Protocol);
    assert_eq!(fake.count_commands("cat /proc/mounts"), refreshes + 1);
}

#[test]
fn build_info_event_fires_only_when_build_entries_change() {
    let fake = scripted_transport();
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let events = record_events(&session, EventKind::BuildInfoChanged);

    session.refresh_properties();
    assert!(events.lock().unwrap().is_empty());

    fake.reply(
        "getprop",
        &PROPS.replace("[persist.sys.language]: [en]", "[persist.sys.language]: [fr]"),
    );
    session.refresh_properties();
    assert!(events.lock().unwrap().is_empty());

    fake.reply("getprop", &PROPS.replace("UQ1A", "UQ1B"));
    session.refresh_properties();
    assert_eq!(
        *events.lock().unwrap(),
        vec![SessionEvent::BuildInfoChanged {
            serial: "R58M123".to_string()
        }]
    );
}

#[test]
fn client_list_updates_notify_on_change() {
    let fake = Arc::new(FakeTransport::new());
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let id = session.subscribe(EventKind::ClientListChanged, move |_: &SessionEvent| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    let clients = vec![
        ClientProcess {
            pid: 4321,
            package: "com.example.app".to_string(),
        },
        ClientProcess {
            pid: 987,
            package: "com.android.systemui".to_string(),
        },
    ];
    session.update_clients(clients.clone());
    session.update_clients(clients);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(session.client_name(4321).as_deref(), Some("com.example.app"));
    assert_eq!(session.client_name(1), None);

    assert!(session.unsubscribe(id));
    session.update_clients(Vec::new());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(session.clients().is_empty());
}

#[test]
fn sync_session_is_none_when_transfer_unavailable() {
    let fake = Arc::new(FakeTransport::new());
    let session = session_for(&fake, "R58M123", DeviceState::Online);
    assert!(session.sync_session().is_some());
    fake.set_sync_available(false);
    assert!(session.sync_session().is_none());
}

#[test]
fn execute_shell_uses_default_timeout() {
    let fake = Arc::new(FakeTransport::new());
    fake.reply("ls", "a\nb\n");
    let session = session_for(&fake, "R58M123", DeviceState::Online);

    let mut receiver = OutputReceiver::null();
    session
        .execute_shell("ls /sdcard/{Download}", &mut receiver, None)
        .unwrap();
    assert_eq!(receiver.line_count(), 2);
    let call = fake.shell_calls().pop().unwrap();
    assert_eq!(call.command, "ls /sdcard/{Download}");
    assert_eq!(call.timeout, Some(Duration::from_millis(10_000)));
}
