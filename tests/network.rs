//! Whole-network scenarios over an in-process network.

use std::str::FromStr;
use std::time::Duration;

use kadstore::{
    rpc::MemoryNetwork, ContentLookupOutcome, Dht, Error, FreshGetParameter, FsContentStore,
    GetParameter, Id, LookupError, StorageEntry, StorageError, Testnet,
};

/// Nodes with ids spread so no bucket of k = 5 ever overflows, each node
/// bootstrapped to every node before it, so every routing table is complete.
fn complete_network(network: &MemoryNetwork) -> Vec<Dht> {
    let ids = [
        "0000000000000000000000000000000000000000",
        "1000000000000000000000000000000000000000",
        "2000000000000000000000000000000000000000",
        "3000000000000000000000000000000000000000",
        "4000000000000000000000000000000000000000",
        "8000000000000000000000000000000000000000",
        "9000000000000000000000000000000000000000",
        "a000000000000000000000000000000000000000",
        "b000000000000000000000000000000000000000",
        "c000000000000000000000000000000000000000",
    ];

    let mut nodes: Vec<Dht> = vec![];

    for id in ids {
        let bootstrap = nodes
            .iter()
            .map(|node| node.local_addr().to_string())
            .collect::<Vec<_>>();

        let node = Dht::builder()
            .network(network)
            .id(Id::from_str(id).unwrap())
            .k(5)
            .bootstrap(&bootstrap)
            .build()
            .unwrap();

        nodes.push(node);
    }

    nodes
}

#[test]
fn put_get_from_non_replica() {
    let network = MemoryNetwork::new();
    let nodes = complete_network(&network);

    let a = &nodes[0];

    let key = Id::random();
    let entry = StorageEntry::new(key, "alice", "post", vec![7_u8; 1024]);

    assert_eq!(a.put(entry.clone()).unwrap(), 5);

    let b = nodes
        .iter()
        .find(|node| node.info().unwrap().stored_entries() == 0)
        .expect("only 5 nodes hold a replica");

    let got = b.get(&GetParameter::new(key).with_owner("alice")).unwrap();

    assert_eq!(got.payload(), entry.payload());
    assert_eq!(got.metadata().content_hash(), entry.metadata().content_hash());
    assert_eq!(got.metadata().last_updated(), entry.metadata().last_updated());

    // A plain get doesn't keep a copy.
    assert_eq!(b.info().unwrap().stored_entries(), 0);
}

#[test]
fn store_replicates_to_exactly_the_closest() {
    let network = MemoryNetwork::new();
    let nodes = complete_network(&network);

    for node in &nodes {
        assert_eq!(node.info().unwrap().routing_table_size(), 9);
    }

    let key = Id::random();

    let mut by_distance = nodes.iter().map(|node| node.id()).collect::<Vec<_>>();
    by_distance.sort_by_key(|id| id.xor(&key));
    let expected = &by_distance[..5];

    let entry = StorageEntry::new(key, "alice", "post", "hello");
    assert_eq!(nodes[3].put(entry).unwrap(), 5);

    for node in &nodes {
        let stored = node.get_cached(&GetParameter::new(key)).is_ok();

        assert_eq!(
            stored,
            expected.contains(&node.id()),
            "node {} stored: {}",
            node.id(),
            stored
        );

        if stored {
            let entry = node.get_cached(&GetParameter::new(key)).unwrap();
            assert!(entry.metadata().is_k_node());
            assert!(!entry.metadata().is_cached());
        }
    }
}

#[test]
fn lookup_asks_every_node_when_network_is_small() {
    let testnet = Testnet::new(8).unwrap();

    let dht = Dht::builder()
        .network(&testnet.network)
        .bootstrap(&testnet.bootstrap)
        .build()
        .unwrap();

    let closest = dht.find_node(Id::random()).unwrap();

    assert_eq!(closest.len(), 9);

    // Every node that was asked learned about the requester.
    for node in &testnet.nodes {
        let bootstrap = node.to_bootstrap().unwrap();

        assert!(bootstrap.contains(&dht.local_addr().to_string()));
    }
}

#[test]
fn cached_copy_is_refreshed() {
    let testnet = Testnet::new_with(5, |builder| {
        builder
            .restore_interval(Duration::ZERO)
            .background_refresh(false)
    })
    .unwrap();

    let a = &testnet.nodes[0];
    let b = &testnet.nodes[1];

    let key = Id::random();
    let parameter = GetParameter::new(key).with_owner("alice").with_type("post");

    a.put_locally(StorageEntry::new(key, "alice", "post", "first").with_last_updated(100))
        .unwrap();

    let cached = b.get_and_cache(&parameter).unwrap();
    assert_eq!(cached.payload().as_ref(), b"first");

    let local = b.get_cached(&parameter).unwrap();
    assert!(local.metadata().is_cached());
    assert!(!local.metadata().is_k_node());

    // Only A holds the newer version.
    a.put_locally(StorageEntry::new(key, "alice", "post", "second").with_last_updated(200))
        .unwrap();

    assert_eq!(b.refresh().unwrap(), 1);

    let refreshed = b.get_cached(&parameter).unwrap();
    assert_eq!(refreshed.payload().as_ref(), b"second");
    assert_eq!(refreshed.metadata().last_updated(), 200);
    assert!(refreshed.metadata().is_cached());

    // Nobody else received a copy from B.
    for node in &testnet.nodes[2..] {
        assert!(node.get_cached(&parameter).is_err());
    }
}

#[test]
fn get_refreshes_cached_copy() {
    let testnet = Testnet::new(5).unwrap();

    let a = &testnet.nodes[0];
    let b = &testnet.nodes[1];

    let key = Id::random();
    let parameter = GetParameter::new(key);

    b.cache(StorageEntry::new(key, "alice", "post", "old").with_last_updated(1))
        .unwrap();
    a.put_locally(StorageEntry::new(key, "alice", "post", "new").with_last_updated(2))
        .unwrap();

    assert_eq!(b.get(&parameter).unwrap().payload().as_ref(), b"new");

    let local = b.get_cached(&parameter).unwrap();
    assert_eq!(local.payload().as_ref(), b"new");
    assert!(local.metadata().is_cached());
    assert!(!local.metadata().is_k_node());
}

#[test]
fn refreshed_copies_keep_local_flags() {
    let network = MemoryNetwork::new();

    let a = Dht::builder()
        .network(&network)
        .id(Id::from_str("0000000000000000000000000000000000000000").unwrap())
        .k(1)
        .build()
        .unwrap();
    let b = Dht::builder()
        .network(&network)
        .id(Id::from_str("8000000000000000000000000000000000000000").unwrap())
        .k(1)
        .bootstrap(&[a.local_addr().to_string()])
        .build()
        .unwrap();

    let key = Id::from_str("0000000000000000000000000000000000000001").unwrap();
    let parameter = GetParameter::new(key);

    b.cache(StorageEntry::new(key, "alice", "post", "v1").with_last_updated(1))
        .unwrap();

    // Only A is among the k closest, so it holds the replica.
    assert_eq!(
        b.put(StorageEntry::new(key, "alice", "post", "v2").with_last_updated(2))
            .unwrap(),
        1
    );
    assert!(a.get_cached(&parameter).unwrap().metadata().is_k_node());

    let got = b.get(&parameter).unwrap();
    assert_eq!(got.metadata().last_updated(), 2);

    let local = b.get_cached(&parameter).unwrap();
    assert_eq!(local.metadata().last_updated(), 2);
    assert!(local.metadata().is_cached());
    assert!(!local.metadata().is_k_node());

    b.put(StorageEntry::new(key, "alice", "post", "v3").with_last_updated(3))
        .unwrap();

    let updated = b
        .get_updated(&FreshGetParameter::new(parameter.clone(), 2))
        .unwrap();
    assert_eq!(updated.payload().as_ref(), b"v3");

    let local = b.get_cached(&parameter).unwrap();
    assert_eq!(local.metadata().last_updated(), 3);
    assert!(local.metadata().is_cached());
    assert!(!local.metadata().is_k_node());
}

#[test]
fn get_updated() {
    let testnet = Testnet::new(5).unwrap();

    let a = &testnet.nodes[0];
    let b = &testnet.nodes[1];

    let key = Id::random();
    let parameter = GetParameter::new(key).with_owner("alice");

    a.put_locally(StorageEntry::new(key, "alice", "post", "hello").with_last_updated(100))
        .unwrap();

    assert!(matches!(
        b.get_updated(&FreshGetParameter::new(parameter.clone(), 100)),
        Err(Error::UpToDate)
    ));

    let newer = b
        .get_updated(&FreshGetParameter::new(parameter.clone(), 50))
        .unwrap();
    assert_eq!(newer.metadata().last_updated(), 100);

    assert!(matches!(
        b.get_updated(&FreshGetParameter::new(
            GetParameter::new(Id::random()),
            0
        )),
        Err(Error::Storage(StorageError::NotFound))
    ));

    // Without a local copy there is nothing to update.
    assert!(matches!(
        b.update_locally(&FreshGetParameter::new(parameter, 50)),
        Err(Error::Storage(StorageError::NotFound))
    ));
}

#[test]
fn freshness_hops() {
    let testnet = Testnet::new(5).unwrap();

    let a = &testnet.nodes[0];
    let b = &testnet.nodes[1];

    let key = Id::random();

    a.put_locally(StorageEntry::new(key, "alice", "post", "hello").with_last_updated(10))
        .unwrap();

    match b
        .content_lookup_fresh(&FreshGetParameter::new(GetParameter::new(key), 5))
        .unwrap()
    {
        ContentLookupOutcome::Found { from, hops, .. } => {
            assert_eq!(from.id(), &a.id());
            assert!(hops >= 1);
        }
        outcome => panic!("unexpected outcome {outcome:?}"),
    }

    assert!(matches!(
        b.content_lookup_fresh(&FreshGetParameter::new(GetParameter::new(key), 10))
            .unwrap(),
        ContentLookupOutcome::UpToDate { .. }
    ));
}

#[test]
fn offline_nodes_are_skipped() {
    let testnet =
        Testnet::new_with(6, |builder| builder.request_timeout(Duration::from_millis(50))).unwrap();

    let a = &testnet.nodes[0];
    let offline = &testnet.nodes[1];

    testnet.network.set_online(&offline.local_addr(), false);

    let closest = a.find_node(Id::random()).unwrap();

    assert_eq!(closest.len(), 5);
    assert!(closest.iter().all(|node| node.id() != &offline.id()));
}

#[test]
fn routing_failure() {
    let testnet = Testnet::new_with(3, |builder| {
        builder
            .request_timeout(Duration::from_secs(1))
            .operation_timeout(Duration::from_millis(100))
    })
    .unwrap();

    for node in &testnet.nodes[1..] {
        testnet.network.set_online(&node.local_addr(), false);
    }

    let target = Id::random();

    assert!(matches!(
        testnet.nodes[0].find_node(target),
        Err(Error::Lookup(LookupError::RoutingFailure { target: t, .. })) if t == target
    ));
}

#[test]
fn owner_never_asks_the_network() {
    let testnet = Testnet::new(3).unwrap();

    let owner = Dht::builder()
        .network(&testnet.network)
        .bootstrap(&testnet.bootstrap)
        .owner_id("alice")
        .build()
        .unwrap();

    for node in &testnet.nodes {
        testnet.network.set_online(&node.local_addr(), false);
    }

    let outcome = owner
        .content_lookup_fresh(&FreshGetParameter::new(
            GetParameter::new(Id::random()).with_owner("alice"),
            0,
        ))
        .unwrap();

    assert_eq!(outcome, ContentLookupOutcome::UpToDate { hops: 0 });
}

#[test]
fn fs_content_store() {
    let dir = tempfile::tempdir().unwrap();
    let testnet = Testnet::new(3).unwrap();

    let dht = Dht::builder()
        .network(&testnet.network)
        .bootstrap(&testnet.bootstrap)
        .content_store(FsContentStore::new(dir.path()).unwrap())
        .build()
        .unwrap();

    let key = Id::random();
    dht.put(StorageEntry::new(key, "alice", "post", "on disk"))
        .unwrap();

    assert_eq!(
        dht.get_cached(&GetParameter::new(key))
            .unwrap()
            .payload()
            .as_ref(),
        b"on disk"
    );
}
