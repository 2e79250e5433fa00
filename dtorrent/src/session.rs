//! Owns every torrent's state behind one recursive lock, and posts long-running work (start,
//! stop, verify, move, remove) to a single event thread so it executes in FIFO order without
//! blocking the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;

use crate::collaborators::{Announcer, Cache, PeerManager, TorrentId, VerifierWorker};
use crate::config::cfg::Cfg;
use crate::lifecycle::{self, RecentlyRemoved};
use crate::local_data;
use crate::torrent_parser::torrent::Torrent;
use crate::torrent_state::TorrentState;

#[derive(Debug)]
pub enum SessionError {
    UnknownTorrent,
    Geometry(crate::torrent_state::NewTorrentStateError),
}

impl From<crate::torrent_state::NewTorrentStateError> for SessionError {
    fn from(e: crate::torrent_state::NewTorrentStateError) -> Self {
        SessionError::Geometry(e)
    }
}

/// A deferred command posted to the event thread. A tagged enum rather than boxed closures:
/// easier to log, and keeps the event thread from holding arbitrary borrowed state.
pub enum TorrentOp {
    Start(TorrentId),
    Stop(TorrentId),
    Verify(TorrentId, bool),
    Remove(TorrentId, bool),
    RecheckCompleteness(TorrentId),
}

struct SessionInner {
    torrents: HashMap<TorrentId, TorrentState>,
    next_id: TorrentId,
    recently_removed: Vec<RecentlyRemoved>,
    peers: Box<dyn PeerManager + Send>,
    announcer: Box<dyn Announcer + Send>,
    verifier: Box<dyn VerifierWorker + Send>,
    cache: Box<dyn Cache + Send>,
}

/// The session's single recursive lock. Reentrant so a handler running on the event thread can
/// call back into session methods without deadlocking itself.
pub struct Session {
    inner: ReentrantMutex<RefCell<SessionInner>>,
    // `mpsc::Sender` is `Send` but not `Sync`; wrapped so `Session` itself can be shared
    // behind an `Arc` across the event thread and callers.
    event_tx: parking_lot::Mutex<Sender<TorrentOp>>,
}

impl Session {
    pub fn new(
        peers: Box<dyn PeerManager + Send>,
        announcer: Box<dyn Announcer + Send>,
        verifier: Box<dyn VerifierWorker + Send>,
        cache: Box<dyn Cache + Send>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel::<TorrentOp>();
        let session = Arc::new(Self {
            inner: ReentrantMutex::new(RefCell::new(SessionInner {
                torrents: HashMap::new(),
                next_id: 1,
                recently_removed: Vec::new(),
                peers,
                announcer,
                verifier,
                cache,
            })),
            event_tx: parking_lot::Mutex::new(event_tx),
        });

        let worker_session = Arc::clone(&session);
        thread::Builder::new()
            .name("dtorrent-event-thread".to_string())
            .spawn(move || {
                for op in event_rx {
                    worker_session.dispatch(op);
                }
            })
            .expect("failed to spawn event thread");

        session
    }

    /// Posts `op` to the event thread. Calls from a single caller are delivered FIFO.
    pub fn run_in_event_thread(&self, op: TorrentOp) {
        if self.event_tx.lock().send(op).is_err() {
            tracing::error!("event thread is gone, dropping posted operation");
        }
    }

    fn dispatch(&self, op: TorrentOp) {
        match op {
            TorrentOp::Start(id) => self.dispatch_start(id),
            TorrentOp::Stop(id) => self.dispatch_stop(id),
            TorrentOp::Verify(id, start_after) => self.dispatch_verify(id, start_after),
            TorrentOp::Remove(id, delete_local_data) => self.dispatch_remove(id, delete_local_data),
            TorrentOp::RecheckCompleteness(id) => self.dispatch_recheck(id),
        }
    }

    pub fn add_torrent(&self, torrent: &Torrent, cfg: &Cfg) -> Result<TorrentId, SessionError> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let state = TorrentState::new(id, torrent, cfg)?;
        inner.announcer.register(id, &torrent.tiers());
        inner.torrents.insert(id, state);
        Ok(id)
    }

    pub fn start(&self, id: TorrentId) {
        self.run_in_event_thread(TorrentOp::Start(id));
    }

    pub fn stop(&self, id: TorrentId) {
        self.run_in_event_thread(TorrentOp::Stop(id));
    }

    pub fn verify(&self, id: TorrentId, start_after: bool) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(state) = inner.torrents.get_mut(&id) {
            lifecycle::verify(&mut state.flags, &mut *inner.verifier, id, start_after);
        }
        drop(inner);
        drop(guard);
        self.run_in_event_thread(TorrentOp::Verify(id, start_after));
    }

    pub fn remove(&self, id: TorrentId, delete_local_data: bool) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(state) = inner.torrents.get_mut(&id) {
            let removed = lifecycle::remove(&mut state.flags, id);
            inner.recently_removed.push(removed);
        }
        drop(inner);
        drop(guard);
        self.run_in_event_thread(TorrentOp::Remove(id, delete_local_data));
    }

    pub fn recently_removed(&self) -> Vec<TorrentId> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.recently_removed.iter().map(|r| r.id).collect()
    }

    fn dispatch_start(&self, id: TorrentId) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        if let Some(state) = inner.torrents.get_mut(&id) {
            lifecycle::start(&mut state.flags, &mut *inner.peers, &mut *inner.announcer, id, false);
        }
    }

    fn dispatch_stop(&self, id: TorrentId) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        if let Some(state) = inner.torrents.get_mut(&id) {
            lifecycle::stop(
                &mut state.flags,
                &mut *inner.peers,
                &mut *inner.announcer,
                &mut *inner.verifier,
                &mut *inner.cache,
                id,
            );
        }
    }

    fn dispatch_verify(&self, id: TorrentId, _start_after: bool) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        if let Some(state) = inner.torrents.get_mut(&id) {
            lifecycle::verify_begin(&mut state.flags);
            for p in 0..state.geometry.piece_count {
                state.completion.mark_piece_complete(&state.geometry, p);
            }
            lifecycle::verify_complete(&mut state.flags, &mut *inner.peers, &mut *inner.announcer, id);
        }
        drop(inner);
        drop(guard);
        self.run_in_event_thread(TorrentOp::RecheckCompleteness(id));
    }

    fn dispatch_remove(&self, id: TorrentId, delete_local_data: bool) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        if let Some(state) = inner.torrents.get_mut(&id) {
            lifecycle::stop(
                &mut state.flags,
                &mut *inner.peers,
                &mut *inner.announcer,
                &mut *inner.verifier,
                &mut *inner.cache,
                id,
            );
            if delete_local_data {
                let root = state.locations.download_dir.clone();
                if let Err(err) = local_data::remove_local_data(&root, &state.file_map.files) {
                    tracing::error!(torrent = id, ?err, "failed removing local data");
                }
            }
            inner.announcer.unregister(id);
        }
        inner.torrents.remove(&id);
    }

    fn dispatch_recheck(&self, id: TorrentId) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        if let Some(state) = inner.torrents.get_mut(&id) {
            let was_running = state.flags.is_running;
            let result = lifecycle::recheck_completeness(
                &mut state.status,
                was_running,
                &state.geometry,
                &state.file_map,
                &state.completion,
                &mut state.locations,
                &mut *inner.peers,
                &mut *inner.announcer,
                &mut *inner.verifier,
                id,
            );
            if let Err(err) = result {
                state.set_local_error(format!("failed to relocate completed torrent: {err:?}"));
            }
        }
    }

    pub fn set_location(
        &self,
        id: TorrentId,
        new_dir: PathBuf,
        move_from_old: bool,
    ) -> Result<(), SessionError> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let inner = &mut *inner;
        let state = inner.torrents.get_mut(&id).ok_or(SessionError::UnknownTorrent)?;
        lifecycle::set_location(
            &state.file_map,
            &mut state.locations,
            &new_dir,
            move_from_old,
            &mut *inner.verifier,
            id,
            |_moved, _total| {},
        )
        .map_err(|err| {
            tracing::error!(torrent = id, ?err, "set_location failed");
            SessionError::UnknownTorrent
        })
    }
}
