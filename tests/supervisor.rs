use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use inlay_render::gpu::ShmDevice;
use inlay_render::inlay::InlayState;
use inlay_render::protocol::{
    DownstreamRequest, FrameTransportMode, FrameTransportModes, FrameTransportResponse, RenderGuid,
    UpstreamRequest,
};
use inlay_render::shm::ResourceNames;
use inlay_render::surface::MemorySink;
use inlay_render::{HostConfig, InlayHost, RenderProcess, RenderProcessState, SupervisorConfig};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

fn supervisor_config(dir: &tempfile::TempDir) -> SupervisorConfig {
    SupervisorConfig::new(env!("CARGO_BIN_EXE_inlay-render-host"))
        .with_shm_dir(dir.path())
        .with_request_timeout(REQUEST_TIMEOUT)
}

fn device(dir: &tempfile::TempDir) -> Arc<ShmDevice> {
    Arc::new(ShmDevice::new(ResourceNames::new(std::process::id(), dir.path()), None))
}

fn shm_entries(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn wait_ready(host: &mut InlayHost<ShmDevice>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !host.is_ready() {
        assert!(Instant::now() < deadline, "render host never became ready");
        host.pump();
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn host_drives_render_process_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = InlayHost::new(HostConfig::default(), supervisor_config(&dir), device(&dir));
    host.start().unwrap();
    wait_ready(&mut host);
    assert!(host.available_transports().contains(FrameTransportModes::SHARED_TEXTURE));
    assert_eq!(host.transport_mode(), FrameTransportMode::SharedTexture);

    let id = host.add_inlay(Url::parse("https://example.com/").unwrap());
    assert!(host.update_inlay_size(id, PhysicalSize::new(640, 480)).unwrap());
    assert_eq!(host.inlay(id).unwrap().state(), &InlayState::Ready);

    let mut sink = MemorySink::default();
    assert!(host.render_inlay(id, &mut sink).unwrap());
    assert_eq!(sink.size(), PhysicalSize::new(640, 480));

    assert!(host.update_inlay_size(id, PhysicalSize::new(800, 600)).unwrap());
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.size() != PhysicalSize::new(800, 600) {
        assert!(Instant::now() < deadline, "resized frame never arrived");
        host.render_inlay(id, &mut sink).unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    host.set_transport_mode(FrameTransportMode::BitmapBuffer).unwrap();
    assert!(host.update_inlay_size(id, PhysicalSize::new(320, 240)).unwrap());
    let mut bitmap_sink = MemorySink::default();
    assert!(host.render_inlay(id, &mut bitmap_sink).unwrap());
    assert_eq!(bitmap_sink.size(), PhysicalSize::new(320, 240));

    assert!(host.remove_inlay(id).unwrap());
    host.shutdown();
    assert_eq!(host.process().state(), RenderProcessState::Stopped);
}

#[test]
fn start_and_stop_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut process = RenderProcess::new(supervisor_config(&dir), tx);

    process.start().unwrap();
    let pid = process.child_id();
    process.start().unwrap();
    assert_eq!(process.child_id(), pid);
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        UpstreamRequest::ReadyNotification { .. }
    ));

    let started = Instant::now();
    process.stop();
    assert!(started.elapsed() < process.config().shutdown_grace + Duration::from_secs(1));
    process.stop();
    assert_eq!(process.state(), RenderProcessState::Stopped);
    assert_eq!(process.child_id(), None);
}

#[cfg(unix)]
#[test]
fn killed_child_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut process = RenderProcess::new(supervisor_config(&dir), tx);
    process.start().unwrap();
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let created = process
        .send_request::<Option<FrameTransportResponse>>(&DownstreamRequest::NewInlay {
            guid: RenderGuid::new(),
            mode: FrameTransportMode::BitmapBuffer,
            url: Url::parse("https://example.com/").unwrap(),
            size: PhysicalSize::new(640, 480),
        })
        .unwrap();
    assert!(matches!(created, Some(FrameTransportResponse::BitmapBuffer { .. })));
    assert!(shm_entries(&dir).iter().any(|name| name.contains("-bitmap-")));

    let pid = process.child_id().unwrap();
    // SAFETY: `pid` is our own, not yet reaped child.
    let killed = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    assert_eq!(killed, 0);

    let request = DownstreamRequest::NewInlay {
        guid: RenderGuid::new(),
        mode: FrameTransportMode::BitmapBuffer,
        url: Url::parse("https://example.com/").unwrap(),
        size: PhysicalSize::new(64, 64),
    };
    let started = Instant::now();
    let err = process
        .send_request::<Option<FrameTransportResponse>>(&request)
        .unwrap_err();
    assert!(err.is_fatal(), "{err}");
    assert!(started.elapsed() < REQUEST_TIMEOUT + Duration::from_secs(1));

    let started = Instant::now();
    let err = process.send(&request).unwrap_err();
    assert!(err.is_fatal(), "{err}");
    assert!(started.elapsed() < Duration::from_millis(500));

    process.stop();
    assert_eq!(process.state(), RenderProcessState::Stopped);
    assert_eq!(shm_entries(&dir), Vec::<String>::new());
}
