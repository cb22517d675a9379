//! Local Backend Integration Tests
//!
//! End-to-end harvest over a directory on disk: local transport, sled
//! cursors and tallies, JSON-lines output, then rivalry computation from the
//! accumulated tallies.

use std::path::Path;
use std::sync::Arc;

use log_harvester::config::HarvestConfig;
use log_harvester::pipeline::{build_harvester, recompute_rivalries, EventSink, JsonlSink, TallyingSink};
use log_harvester::storage::{CursorStore, HarvestStore, TallyStore};
use log_harvester::transport::connector_for;
use log_harvester::types::{Backend, Credentials, FileKind, ServerDescriptor};

fn local_server(base: &Path) -> ServerDescriptor {
    ServerDescriptor {
        server_id: "7020".to_string(),
        host: "192.168.1.20".to_string(),
        port: 22,
        username: String::new(),
        credentials: Credentials::None,
        base_path_hint: Some(base.to_string_lossy().into_owned()),
        backend: Backend::Local,
    }
}

fn write(base: &Path, rel: &str, body: &str) {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn kill(ts: &str, killer: (&str, &str), victim: (&str, &str), weapon: &str) -> String {
    format!("{ts};{};{};{};{};{weapon};42\n", killer.0, killer.1, victim.0, victim.1)
}

#[tokio::test]
async fn local_harvest_persists_cursor_events_and_rivalries() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let root = "192.168.1.20_7020";

    let alice = ("Alice", "11111111");
    let bob = ("Bob", "22222222");
    let carol = ("Carol", "33333333");
    let mut body = String::new();
    for i in 0..4 {
        body.push_str(&kill(&format!("2025.03.01-10.00.0{i}"), alice, bob, "AK-74"));
    }
    body.push_str(&kill("2025.03.01-10.01.00", alice, carol, "SVD"));
    body.push_str(&kill("2025.03.01-10.02.00", bob, alice, "MP5"));
    body.push_str(&kill("2025.03.01-10.03.00", carol, carol, "suicide_by_relocation"));
    write(remote.path(), &format!("{root}/actual1/deathlogs/world_0/2025.03.01-00.00.00.csv"), &body);
    write(remote.path(), &format!("{root}/deathlogs/world_1/2025.01.01-00.00.00.csv"), "");

    let mut config = HarvestConfig::default();
    config.storage.data_dir = data.path().join("db");
    config.sink.output_dir = data.path().join("events");
    let server = local_server(remote.path());

    let store = HarvestStore::open(&config.storage.data_dir).unwrap();
    let cursors: Arc<dyn CursorStore> = Arc::new(store.cursors().unwrap());
    let tallies: Arc<dyn TallyStore> = Arc::new(store.tallies().unwrap());
    let sink: Arc<dyn EventSink> = Arc::new(TallyingSink::new(
        Arc::new(JsonlSink::new(&config.sink.output_dir)),
        tallies.clone(),
    ));

    let connector = connector_for(&server, &config.transport).unwrap();
    let mut harvester = build_harvester(&config, server, connector, cursors.clone(), sink).unwrap();

    let report = harvester.run_cycle(FileKind::Csv).await.unwrap();
    assert!(report.file.ends_with("actual1/deathlogs/world_0/2025.03.01-00.00.00.csv"));
    assert_eq!(report.lines_read, 7);
    assert_eq!(report.events, 7);

    let cursor = cursors.load("7020", FileKind::Csv).unwrap().unwrap();
    assert_eq!(cursor.last_line_index, 7);

    let jsonl = std::fs::read_to_string(config.sink.output_dir.join("7020/csv.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = jsonl.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 7);
    assert_eq!(records[6]["is_suicide"], true);
    assert_eq!(records[6]["suicide_category"], "menu");

    let results = recompute_rivalries(tallies.as_ref(), "7020", 3).unwrap();
    let alice_result = results.iter().find(|r| r.player_id == alice.1).unwrap();
    let prey = alice_result.prey.as_ref().unwrap();
    assert_eq!(prey.player_id, bob.1);
    assert_eq!(prey.kill_count, 4);
    assert_eq!(prey.death_count, 1);
    assert!(alice_result.nemesis.is_none());

    // Carol's suicide is not a head-to-head kill
    let carol_tally = tallies
        .load_tallies("7020")
        .unwrap()
        .into_iter()
        .find(|t| t.player_id == carol.1)
        .unwrap();
    assert_eq!(carol_tally.total_kills(), 0);
    assert_eq!(carol_tally.total_deaths(), 1);
}

#[tokio::test]
async fn cursor_survives_restart() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let log_rel = "192.168.1.20_7020/Logs/Deadside.log";
    write(
        remote.path(),
        log_rel,
        "[2025.05.01-12.00.00] Player Rambo (a1b2c3d4) connected\n\
         [2025.05.01-12.00.10] Mission started: Bunker\n",
    );

    let mut config = HarvestConfig::default();
    config.sink.output_dir = data.path().join("events");
    let server = local_server(remote.path());

    for expected_cursor in [2u64, 3] {
        let store = HarvestStore::open(&data.path().join("db")).unwrap();
        let cursors: Arc<dyn CursorStore> = Arc::new(store.cursors().unwrap());
        let sink: Arc<dyn EventSink> = Arc::new(JsonlSink::new(&config.sink.output_dir));
        let connector = connector_for(&server, &config.transport).unwrap();
        let mut harvester = build_harvester(&config, server.clone(), connector, cursors, sink).unwrap();

        let report = harvester.run_cycle(FileKind::Log).await.unwrap();
        assert_eq!(report.cursor, expected_cursor);

        // Simulate the server writing more while we are down
        let mut log = std::fs::read_to_string(remote.path().join(log_rel)).unwrap();
        log.push_str("[2025.05.01-12.05.00] Player Rambo (a1b2c3d4) disconnected\n");
        std::fs::write(remote.path().join(log_rel), log).unwrap();
        store.flush().unwrap();
    }

    let jsonl = std::fs::read_to_string(config.sink.output_dir.join("7020/log.jsonl")).unwrap();
    assert_eq!(jsonl.lines().count(), 3);
}
