use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use taskmeta_core::db::{open_db, open_db_in_memory};
use taskmeta_core::{
    ListId, ListRecord, ListStore, ListSyncReconciler, RemoteFetchError, RemoteList,
    RemoteListSource, RosterConfig, RosterError, SqliteListStore, StoreError, StoreResult,
};

const LIST_TYPE: &str = "remote_list";

/// In-memory list store with call counters and injectable write failures.
#[derive(Default)]
struct MemoryListStore {
    lists: Mutex<Vec<ListRecord>>,
    next_id: AtomicUsize,
    loads: AtomicUsize,
    writes: AtomicUsize,
    fail_deletes: Mutex<bool>,
}

impl MemoryListStore {
    fn seeded(lists: Vec<ListRecord>) -> Self {
        let next_id = lists.iter().map(|list| list.local_id).max().unwrap_or(0);
        Self {
            lists: Mutex::new(lists),
            next_id: AtomicUsize::new(usize::try_from(next_id).unwrap()),
            ..Self::default()
        }
    }

    fn stored(&self) -> Vec<ListRecord> {
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ListStore for MemoryListStore {
    fn load_lists(&self, list_type: &str) -> StoreResult<Vec<ListRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let mut lists: Vec<ListRecord> = self
            .stored()
            .into_iter()
            .filter(|list| list.list_type == list_type)
            .collect();
        lists.sort_by_key(|list| (list.ordinal, list.local_id));
        Ok(lists)
    }

    fn insert_list(
        &self,
        list_type: &str,
        remote_id: &str,
        display_name: &str,
        ordinal: u32,
    ) -> StoreResult<ListRecord> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let local_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ListRecord {
            local_id: i64::try_from(local_id).unwrap(),
            list_type: list_type.to_string(),
            remote_id: remote_id.to_string(),
            display_name: display_name.to_string(),
            ordinal,
        };
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record)
    }

    fn update_list(&self, record: &ListRecord) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        match lists.iter_mut().find(|list| list.local_id == record.local_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "remote list",
                id: record.local_id,
            }),
        }
    }

    fn delete_list(&self, local_id: ListId) -> StoreResult<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if *self.fail_deletes.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(StoreError::InvalidData("delete refused".to_string()));
        }
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        let before = lists.len();
        lists.retain(|list| list.local_id != local_id);
        Ok(lists.len() < before)
    }
}

struct StaticSource(Result<Vec<RemoteList>, RemoteFetchError>);

impl RemoteListSource for StaticSource {
    fn fetch_lists(&self) -> Result<Vec<RemoteList>, RemoteFetchError> {
        self.0.clone()
    }
}

fn record(local_id: ListId, remote_id: &str, name: &str, ordinal: u32) -> ListRecord {
    ListRecord {
        local_id,
        list_type: LIST_TYPE.to_string(),
        remote_id: remote_id.to_string(),
        display_name: name.to_string(),
        ordinal,
    }
}

#[test]
fn roster_update_prunes_lists_missing_remotely() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteListStore::try_new(&conn).unwrap();
    let l1 = store.insert_list(LIST_TYPE, "A", "Inbox", 0).unwrap();
    let l2 = store.insert_list(LIST_TYPE, "B", "Errands", 1).unwrap();

    let roster = ListSyncReconciler::new(store, &RosterConfig::default());
    let update = roster
        .update_roster(&[RemoteList::new("A", "Work")])
        .unwrap();

    assert_eq!(update.updated, 1);
    assert_eq!(update.deleted, 1);
    let lists = roster.lists().unwrap();
    assert_eq!(lists, vec![record(l1.local_id, "A", "Work", 0)]);
    assert_eq!(roster.by_local_id(l2.local_id).unwrap(), None);
    assert_eq!(store.load_lists(LIST_TYPE).unwrap(), lists);
}

#[test]
fn pruned_roster_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskmeta.db");

    let (kept, pruned) = {
        let conn = open_db(&path).unwrap();
        let store = SqliteListStore::try_new(&conn).unwrap();
        let l1 = store.insert_list(LIST_TYPE, "A", "Inbox", 0).unwrap();
        let l2 = store.insert_list(LIST_TYPE, "B", "Errands", 1).unwrap();
        store.insert_list("other_list", "B", "Elsewhere", 0).unwrap();

        let roster = ListSyncReconciler::new(store, &RosterConfig::default());
        let update = roster
            .update_roster(&[RemoteList::new("A", "Work")])
            .unwrap();
        assert_eq!((update.updated, update.deleted, update.failed), (1, 1, 0));
        (l1.local_id, l2.local_id)
    };

    let conn = open_db(&path).unwrap();
    let store = SqliteListStore::try_new(&conn).unwrap();
    let roster = ListSyncReconciler::new(store, &RosterConfig::default());
    assert!(!roster.is_loaded());

    assert_eq!(roster.lists().unwrap(), vec![record(kept, "A", "Work", 0)]);
    assert_eq!(roster.by_local_id(pruned).unwrap(), None);
    assert_eq!(roster.list_name("B").unwrap(), None);
    assert_eq!(store.load_lists("other_list").unwrap().len(), 1);

    let update = roster
        .update_roster(&[RemoteList::new("B", "Errands"), RemoteList::new("A", "Work")])
        .unwrap();
    assert_eq!((update.created, update.updated), (1, 1));
    let remote_ids: Vec<String> = store
        .load_lists(LIST_TYPE)
        .unwrap()
        .into_iter()
        .map(|list| list.remote_id)
        .collect();
    assert_eq!(remote_ids, vec!["B", "A"]);
}

#[test]
fn roster_update_creates_and_reorders_by_position() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteListStore::try_new(&conn).unwrap();
    let inbox = store.insert_list(LIST_TYPE, "A", "Inbox", 0).unwrap();

    let roster = ListSyncReconciler::new(store, &RosterConfig::default());
    let update = roster
        .update_roster(&[RemoteList::new("C", "Shopping"), RemoteList::new("A", "Inbox")])
        .unwrap();

    assert_eq!(update.created, 1);
    assert_eq!(update.updated, 1);
    let lists = roster.lists().unwrap();
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[0].remote_id, "C");
    assert_eq!(lists[0].ordinal, 0);
    assert_eq!(lists[1], record(inbox.local_id, "A", "Inbox", 1));
    assert_eq!(store.load_lists(LIST_TYPE).unwrap(), lists);
}

#[test]
fn unchanged_roster_issues_no_writes() {
    let store = MemoryListStore::seeded(vec![record(1, "A", "Inbox", 0)]);
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);

    let update = roster
        .update_roster(&[RemoteList::new("A", "Inbox")])
        .unwrap();

    assert_eq!(update.unchanged, 1);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn roster_loads_lazily_once_and_lookups_stay_local() {
    let store = MemoryListStore::seeded(vec![
        record(1, "A", "Inbox", 0),
        record(2, "B", "Errands", 1),
    ]);
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);
    assert!(!roster.is_loaded());
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);

    assert_eq!(roster.list_name("B").unwrap(), Some("Errands".to_string()));
    assert_eq!(roster.by_local_id(1).unwrap().map(|l| l.remote_id), Some("A".to_string()));
    assert_eq!(roster.by_remote_id("missing").unwrap(), None);
    assert_eq!(roster.lists().unwrap().len(), 2);

    assert!(roster.is_loaded());
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);

    roster.update_roster(&[RemoteList::new("A", "Inbox")]).unwrap();
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn duplicate_remote_ids_are_applied_once() {
    let store = MemoryListStore::default();
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);

    let update = roster
        .update_roster(&[
            RemoteList::new("A", "First"),
            RemoteList::new("A", "Second"),
            RemoteList::new("B", "Other"),
        ])
        .unwrap();

    assert_eq!(update.created, 2);
    assert_eq!(update.skipped_duplicates, 1);
    let lists = roster.lists().unwrap();
    assert_eq!(lists.len(), 2);
    assert_eq!(lists[0].display_name, "First");
    assert_eq!(lists[1].ordinal, 2);
}

#[test]
fn failed_delete_keeps_the_list_cached() {
    let store = MemoryListStore::seeded(vec![
        record(1, "A", "Inbox", 0),
        record(2, "B", "Errands", 1),
    ]);
    *store.fail_deletes.lock().unwrap() = true;
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);

    let update = roster
        .update_roster(&[RemoteList::new("A", "Inbox")])
        .unwrap();

    assert_eq!(update.failed, 1);
    assert_eq!(update.deleted, 0);
    assert_eq!(roster.by_local_id(2).unwrap(), Some(record(2, "B", "Errands", 1)));
    assert_eq!(store.stored().len(), 2);
}

#[test]
fn refresh_applies_fetched_roster() {
    let store = MemoryListStore::seeded(vec![record(1, "A", "Inbox", 0)]);
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);
    let source = StaticSource(Ok(vec![
        RemoteList::new("A", "Inbox"),
        RemoteList::new("B", "Errands"),
    ]));

    let update = roster.refresh(&source).unwrap();

    assert_eq!(update.created, 1);
    assert_eq!(roster.list_name("B").unwrap(), Some("Errands".to_string()));
}

#[test]
fn refresh_fetch_failure_leaves_roster_untouched() {
    let store = MemoryListStore::seeded(vec![record(1, "A", "Inbox", 0)]);
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);
    let source = StaticSource(Err(RemoteFetchError::new(
        "auth_expired",
        "token expired",
        true,
    )));

    let err = roster.refresh(&source).unwrap_err();

    assert!(matches!(err, RosterError::Fetch(ref fetch) if fetch.code == "auth_expired"));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    assert_eq!(roster.lists().unwrap(), vec![record(1, "A", "Inbox", 0)]);
}

#[test]
fn concurrent_readers_see_whole_rosters_only() {
    let old_roster = vec![record(1, "A", "Inbox", 0), record(2, "B", "Errands", 1)];
    let store = MemoryListStore::seeded(old_roster.clone());
    let roster = ListSyncReconciler::with_list_type(&store, LIST_TYPE);
    let remote = vec![
        RemoteList::new("C", "Shopping"),
        RemoteList::new("D", "Travel"),
        RemoteList::new("E", "Reading"),
    ];

    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let mut sizes = Vec::new();
                    for _ in 0..200 {
                        let lists = roster.lists().unwrap();
                        let remote_ids: Vec<&str> =
                            lists.iter().map(|list| list.remote_id.as_str()).collect();
                        assert!(
                            remote_ids == ["A", "B"] || remote_ids == ["C", "D", "E"],
                            "partial roster observed: {remote_ids:?}"
                        );
                        sizes.push(lists.len());
                    }
                    sizes
                })
            })
            .collect();

        roster.update_roster(&remote).unwrap();

        for reader in readers {
            let sizes = reader.join().unwrap();
            assert!(sizes.iter().all(|size| *size == 2 || *size == 3));
        }
    });

    let final_ids: Vec<String> = roster
        .lists()
        .unwrap()
        .into_iter()
        .map(|list| list.remote_id)
        .collect();
    assert_eq!(final_ids, vec!["C", "D", "E"]);
}
