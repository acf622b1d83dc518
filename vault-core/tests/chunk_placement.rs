use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use vault_core::chunker::{Chunker, ChunkerConfig};
use vault_core::merkle::digest;
use vault_core::node::{MemNode, NodeSet, NodeStore};
use vault_core::VaultError;

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut v = vec![0u8; len];
    rng.fill(&mut v[..]);
    v
}

#[test]
fn two_and_a_half_mib_into_three_chunks_round_robin() {
    let mib = 1usize << 20;
    let data = random_bytes(2 * mib + mib / 2, 7);
    let nodes = NodeSet::in_memory(&["A", "B", "C"]).unwrap();
    let chunker = Chunker::new(&nodes, ChunkerConfig { chunk_size: mib, write_window: 2 }).unwrap();

    let out = chunker.split("file1", &mut Cursor::new(&data[..]), data.len() as u64).unwrap();

    let lens: Vec<u64> = out.chunks.iter().map(|c| c.len).collect();
    assert_eq!(lens, [1_048_576, 1_048_576, 524_288]);
    let placed: Vec<&str> = out.chunks.iter().map(|c| c.node.as_str()).collect();
    assert_eq!(placed, ["A", "B", "C"]);
    let names: Vec<&str> = out.chunks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["file1_0.chunk", "file1_1.chunk", "file1_2.chunk"]);
    assert_eq!(out.size_bytes, data.len() as u64);
    assert_eq!(out.file_digest, digest(&data));

    for (i, ch) in out.chunks.iter().enumerate() {
        let start = i * mib;
        let end = (start + mib).min(data.len());
        assert_eq!(out.digests[i], digest(&data[start..end]));
        assert_eq!(ch.digest, out.digests[i].to_hex().to_string());
        let mut stored = Vec::new();
        nodes.get(&ch.node).unwrap().open(&ch.name).unwrap().read_to_end(&mut stored).unwrap();
        assert_eq!(stored, &data[start..end]);
    }
}

#[test]
fn single_node_holds_every_chunk() {
    let data = random_bytes(10_000, 3);
    let nodes = NodeSet::in_memory(&["solo"]).unwrap();
    let cfg = ChunkerConfig { chunk_size: 1024, write_window: 3 };
    let chunker = Chunker::new(&nodes, cfg).unwrap();
    let out = chunker.split("f", &mut Cursor::new(&data[..]), data.len() as u64).unwrap();
    assert_eq!(out.chunks.len(), 10);
    assert!(out.chunks.iter().all(|c| c.node == "solo"));
    assert_eq!(nodes.get("solo").unwrap().keys().unwrap().len(), 10);
}

#[test]
fn empty_source_yields_no_chunks() {
    let nodes = NodeSet::in_memory(&["a", "b"]).unwrap();
    let chunker = Chunker::new(&nodes, ChunkerConfig::default()).unwrap();
    let out = chunker.split("empty", &mut Cursor::new(Vec::<u8>::new()), 0).unwrap();
    assert!(out.chunks.is_empty());
    assert!(out.digests.is_empty());
    assert_eq!(out.size_bytes, 0);
    assert_eq!(out.file_digest, digest(b""));
}

/// Accepts a fixed number of writes, then fails every later one.
struct FlakyNode {
    inner: MemNode,
    budget: parking_lot::Mutex<usize>,
}

impl NodeStore for FlakyNode {
    fn id(&self) -> &str {
        self.inner.id()
    }
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut b = self.budget.lock();
        if *b == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        *b -= 1;
        self.inner.write(key, bytes)
    }
    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>> {
        self.inner.open(key)
    }
    fn remove(&self, key: &str) -> io::Result<()> {
        self.inner.remove(key)
    }
    fn keys(&self) -> io::Result<Vec<String>> {
        self.inner.keys()
    }
}

#[test]
fn write_failure_aborts_and_removes_written_chunks() {
    let good = Arc::new(MemNode::new("good"));
    let flaky = Arc::new(FlakyNode {
        inner: MemNode::new("flaky"),
        budget: parking_lot::Mutex::new(1),
    });
    let nodes =
        NodeSet::new(vec![good.clone() as Arc<dyn NodeStore>, flaky.clone() as Arc<dyn NodeStore>])
            .unwrap();
    let chunker = Chunker::new(&nodes, ChunkerConfig { chunk_size: 16, write_window: 1 }).unwrap();
    let data = random_bytes(16 * 6, 11);

    let err = chunker.split("f", &mut Cursor::new(&data[..]), data.len() as u64).unwrap_err();
    match err {
        VaultError::StorageWrite { node, name, .. } => {
            assert_eq!(node, "flaky");
            assert_eq!(name, "f_3.chunk");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(good.is_empty());
    assert!(flaky.keys().unwrap().is_empty());
}

proptest! {
    #[test]
    fn chunks_tile_the_source(
        len in 0usize..5000,
        chunk_size in 1usize..700,
        window in 1usize..6,
        n_nodes in 1usize..5,
    ) {
        let data = random_bytes(len, len as u64);
        let ids: Vec<String> = (0..n_nodes).map(|i| format!("n{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let nodes = NodeSet::in_memory(&id_refs).unwrap();
        let cfg = ChunkerConfig { chunk_size, write_window: window };
        let chunker = Chunker::new(&nodes, cfg).unwrap();
        let out = chunker.split("p", &mut Cursor::new(&data[..]), len as u64).unwrap();

        prop_assert_eq!(out.chunks.len(), len.div_ceil(chunk_size));
        let mut offset = 0usize;
        let mut rebuilt = Vec::with_capacity(len);
        for (i, ch) in out.chunks.iter().enumerate() {
            prop_assert_eq!(ch.index, i as u64);
            prop_assert_eq!(&ch.node, &ids[i % n_nodes]);
            let end = (offset + chunk_size).min(len);
            prop_assert_eq!(ch.len as usize, end - offset);
            nodes.get(&ch.node).unwrap().open(&ch.name).unwrap().read_to_end(&mut rebuilt).unwrap();
            offset = end;
        }
        prop_assert_eq!(offset, len);
        prop_assert_eq!(rebuilt, data);
    }
}
