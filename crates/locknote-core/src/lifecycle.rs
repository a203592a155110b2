use crate::gate::{AuthOracle, GateState, SecurityGate};
use crate::models::{now_millis, Note};
use crate::reconciler::{NotesSubscription, ReconciledNotes, Reconciler, ReconcilerOptions};
use crate::store::{NoteStore, StoreError};
use crate::telemetry::{Severity, Telemetry};
use crate::vault::{CryptoVault, PasscodeCheck, SecurityOptions, VaultError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const COMPONENT: &str = "lifecycle";

#[derive(Debug)]
pub enum SecurityError {
    Locked,
    AuthenticationFailed,
    BiometricDisabled,
    Vault(VaultError),
    Store(StoreError),
    /// Some notes could not be decrypted; they stay encrypted and the key is kept.
    MigrationIncomplete { migrated: usize, failed: usize },
}

impl From<VaultError> for SecurityError {
    fn from(err: VaultError) -> Self {
        Self::Vault(err)
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::Locked => write!(f, "notes are locked"),
            SecurityError::AuthenticationFailed => write!(f, "authentication failed"),
            SecurityError::BiometricDisabled => write!(f, "biometric unlock is not enabled"),
            SecurityError::Vault(err) => write!(f, "{err}"),
            SecurityError::Store(err) => write!(f, "{err}"),
            SecurityError::MigrationIncomplete { migrated, failed } => write!(
                f,
                "security is still enabled: {failed} note(s) could not be decrypted ({migrated} migrated)"
            ),
        }
    }
}

impl std::error::Error for SecurityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SecurityError::Vault(err) => Some(err),
            SecurityError::Store(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisableReport {
    pub migrated: usize,
}

/// Feature flags and lock state. Carries no note content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityStatus {
    pub security_enabled: bool,
    pub biometric_enabled: bool,
    pub private_notes_enabled: bool,
    pub private_mode: bool,
    pub key_version: Option<u64>,
    pub gate: GateState,
}

/// Orchestrates the security feature: enable/disable with migration, the save
/// policy, private mode and lock state. Owns the gate and the reconciler.
pub struct SecurityLifecycleManager {
    store: Arc<dyn NoteStore>,
    vault: Arc<CryptoVault>,
    telemetry: Arc<dyn Telemetry>,
    gate: Arc<SecurityGate>,
    reconciler: Reconciler,
    private_mode: AtomicBool,
    writes: Mutex<()>,
}

impl SecurityLifecycleManager {
    pub fn new(
        store: Arc<dyn NoteStore>,
        vault: Arc<CryptoVault>,
        telemetry: Arc<dyn Telemetry>,
        idle_grace: Duration,
    ) -> Self {
        let security_enabled = vault.is_security_enabled();
        let gate = Arc::new(SecurityGate::new(security_enabled));
        let reconciler = Reconciler::spawn(
            Arc::clone(&store),
            Arc::clone(&vault),
            Arc::clone(&telemetry),
            ReconcilerOptions {
                idle_grace,
                security_enabled,
                suspended: !gate.is_open(),
                ..ReconcilerOptions::default()
            },
        );
        tracing::debug!(security_enabled, gate = ?gate.state(), "security lifecycle ready");

        Self {
            store,
            vault,
            telemetry,
            gate,
            reconciler,
            private_mode: AtomicBool::new(false),
            writes: Mutex::new(()),
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn ensure_open(&self) -> Result<(), SecurityError> {
        if self.gate.is_open() {
            Ok(())
        } else {
            Err(SecurityError::Locked)
        }
    }

    fn store_failure(&self, action: &str, err: StoreError) -> SecurityError {
        self.telemetry
            .report(Severity::Error, COMPONENT, action, Some(&err));
        SecurityError::Store(err)
    }

    pub fn status(&self) -> SecurityStatus {
        SecurityStatus {
            security_enabled: self.vault.is_security_enabled(),
            biometric_enabled: self.vault.is_biometric_enabled(),
            private_notes_enabled: self.vault.is_private_notes_enabled(),
            private_mode: self.is_private_mode(),
            key_version: self.vault.key_version(),
            gate: self.gate.state(),
        }
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn is_private_mode(&self) -> bool {
        self.private_mode.load(Ordering::SeqCst)
    }

    /// Returns the new key version.
    pub fn enable_security(&self, options: &SecurityOptions) -> Result<u64, SecurityError> {
        let _writes = self.write_guard();
        let version = self.vault.enable(options)?;
        self.gate.security_enabled();
        self.reconciler
            .reset_security(true, self.is_private_mode());
        self.reconciler.resume();
        Ok(version)
    }

    /// Decrypts every encrypted note back to plaintext, then clears the key.
    /// The key survives if any note could not be migrated.
    pub fn disable_security(&self) -> Result<DisableReport, SecurityError> {
        let _writes = self.write_guard();
        self.ensure_open()?;

        let encrypted = self
            .store
            .get_all_encrypted()
            .map_err(|err| self.store_failure("could not list encrypted notes", err))?;

        let mut migrated = 0;
        let mut failed = 0;
        for note in &encrypted {
            let plain = match self.vault.unseal_note(note) {
                Ok(plain) => plain,
                Err(err) => {
                    failed += 1;
                    self.telemetry.report(
                        Severity::Warning,
                        COMPONENT,
                        &format!("note {} left encrypted", note.id),
                        Some(&err),
                    );
                    continue;
                }
            };
            match self.store.upsert(&plain) {
                Ok(_) => migrated += 1,
                Err(err) => {
                    failed += 1;
                    self.telemetry.report(
                        Severity::Error,
                        COMPONENT,
                        &format!("note {} could not be rewritten as plaintext", note.id),
                        Some(&err),
                    );
                }
            }
        }

        if failed == 0 {
            failed = self
                .store
                .get_all_encrypted()
                .map_err(|err| self.store_failure("could not verify migration", err))?
                .len();
        }
        if failed > 0 {
            self.telemetry.report(
                Severity::Error,
                COMPONENT,
                &format!("disable incomplete: {migrated} migrated, {failed} still encrypted"),
                None,
            );
            return Err(SecurityError::MigrationIncomplete { migrated, failed });
        }

        self.vault.disable()?;
        self.gate.security_disabled();
        self.private_mode.store(false, Ordering::SeqCst);
        self.reconciler.reset_security(false, false);
        self.reconciler.resume();
        self.telemetry.report(
            Severity::Info,
            COMPONENT,
            &format!("security disabled, {migrated} note(s) migrated"),
            None,
        );
        Ok(DisableReport { migrated })
    }

    /// No-op unless private notes are enabled. Returns the resulting mode.
    pub fn toggle_private_mode(&self) -> bool {
        // Flag flip and reconciler signal go out under one guard so concurrent
        // toggles reach the worker in the order they changed the flag.
        let _writes = self.write_guard();
        if !self.vault.is_private_notes_enabled() {
            return self.is_private_mode();
        }
        let enabled = !self.private_mode.fetch_xor(true, Ordering::SeqCst);
        self.reconciler.set_private_mode(enabled);
        enabled
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        self.reconciler.set_search_query(query);
    }

    pub fn lock(&self) -> GateState {
        let _writes = self.write_guard();
        let state = self.gate.lock();
        if state == GateState::Locked {
            self.reconciler.suspend();
        }
        state
    }

    pub fn unlock_with_passcode(&self, passcode: &str) -> Result<GateState, SecurityError> {
        self.authenticate(&PasscodeCheck::new(&self.vault, passcode))
    }

    pub fn unlock_with_biometric(&self, oracle: &dyn AuthOracle) -> Result<GateState, SecurityError> {
        if self.gate.state() == GateState::Locked && !self.vault.is_biometric_enabled() {
            return Err(SecurityError::BiometricDisabled);
        }
        self.authenticate(oracle)
    }

    fn authenticate(&self, oracle: &dyn AuthOracle) -> Result<GateState, SecurityError> {
        let _writes = self.write_guard();
        match self.gate.authenticate(oracle) {
            Ok(state) => {
                self.reconciler.resume();
                Ok(state)
            }
            Err(_) => {
                self.telemetry
                    .report(Severity::Info, COMPONENT, "unlock attempt rejected", None);
                Err(SecurityError::AuthenticationFailed)
            }
        }
    }

    /// Persists `note` under the current policy and returns the stored record.
    /// With security and private mode on the note becomes private and is sealed.
    /// A note already stored as private stays private and sealed in either mode.
    /// Everything else is written as non-private plaintext.
    pub fn save_note(&self, note: Note) -> Result<Note, SecurityError> {
        let _writes = self.write_guard();
        self.ensure_open()?;

        let stored_private = if note.is_new() {
            false
        } else {
            self.store
                .get_by_id(note.id)
                .map_err(|err| self.store_failure("could not load stored note", err))?
                .is_some_and(|stored| stored.private)
        };

        let mut note = note.into_plaintext();
        note.timestamp = now_millis();
        if self.vault.is_security_enabled() && (self.is_private_mode() || stored_private) {
            note.private = true;
            note = self.vault.seal_note(note);
        } else {
            note.private = false;
        }

        let id = self
            .store
            .upsert(&note)
            .map_err(|err| self.store_failure("could not save note", err))?;
        note.id = id;
        Ok(note)
    }

    pub fn get_note(&self, note_id: i64) -> Result<Option<Note>, SecurityError> {
        self.ensure_open()?;
        let note = self
            .store
            .get_by_id(note_id)
            .map_err(|err| self.store_failure("could not load note", err))?;
        Ok(note.map(|note| {
            if note.encrypted && self.vault.is_security_enabled() {
                self.vault.reveal_note(&note)
            } else {
                note
            }
        }))
    }

    pub fn delete_note(&self, note_id: i64) -> Result<usize, SecurityError> {
        let _writes = self.write_guard();
        self.ensure_open()?;
        self.store
            .delete_by_id(note_id)
            .map_err(|err| self.store_failure("could not delete note", err))
    }

    pub fn archive_note(&self, note: Note) -> Result<Note, SecurityError> {
        self.save_note(Note {
            archived: true,
            pinned: false,
            ..note
        })
    }

    pub fn unarchive_note(&self, note: Note) -> Result<Note, SecurityError> {
        self.save_note(Note {
            archived: false,
            ..note
        })
    }

    pub fn notes(&self) -> Result<NotesView, SecurityError> {
        self.ensure_open()?;
        Ok(NotesView {
            gate: Arc::clone(&self.gate),
            subscription: self.reconciler.subscribe(),
        })
    }
}

/// Reconciled notes behind the security gate. Every accessor fails with
/// `SecurityError::Locked` while the gate is locked.
pub struct NotesView {
    gate: Arc<SecurityGate>,
    subscription: NotesSubscription,
}

impl NotesView {
    fn ensure_open(&self) -> Result<(), SecurityError> {
        if self.gate.is_open() {
            Ok(())
        } else {
            Err(SecurityError::Locked)
        }
    }

    pub fn latest(&self) -> Result<Arc<ReconciledNotes>, SecurityError> {
        self.ensure_open()?;
        Ok(self.subscription.latest())
    }

    pub fn active(&self) -> Result<Vec<Note>, SecurityError> {
        Ok(self.latest()?.active.clone())
    }

    pub fn archived(&self) -> Result<Vec<Note>, SecurityError> {
        Ok(self.latest()?.archived.clone())
    }

    pub fn next_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Arc<ReconciledNotes>>, SecurityError> {
        self.ensure_open()?;
        let next = self.subscription.next_timeout(timeout);
        self.ensure_open()?;
        Ok(next)
    }

    pub fn wait_for<F>(
        &self,
        timeout: Duration,
        predicate: F,
    ) -> Result<Option<Arc<ReconciledNotes>>, SecurityError>
    where
        F: Fn(&ReconciledNotes) -> bool,
    {
        self.ensure_open()?;
        let found = self.subscription.wait_for(timeout, predicate);
        self.ensure_open()?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::{SecurityError, SecurityLifecycleManager};
    use crate::db::Database;
    use crate::gate::GateState;
    use crate::models::Note;
    use crate::settings::MemorySettings;
    use crate::store::{
        shared, NoteQuery, NoteStore, SnapshotSink, SqliteNoteStore, StoreError, WatchId,
    };
    use crate::telemetry::{RecordingTelemetry, Severity};
    use crate::vault::{CryptoVault, SecurityOptions};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        store: Arc<SqliteNoteStore>,
        telemetry: Arc<RecordingTelemetry>,
        manager: SecurityLifecycleManager,
    }

    fn harness() -> Harness {
        let db = Database::new_in_memory().expect("db init");
        db.run_migrations().expect("migrations");
        let store = Arc::new(SqliteNoteStore::new(shared(db)));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let vault = Arc::new(CryptoVault::new(
            Arc::new(MemorySettings::new()),
            telemetry.clone(),
        ));
        let manager = SecurityLifecycleManager::new(
            store.clone(),
            vault,
            telemetry.clone(),
            Duration::from_millis(100),
        );
        Harness {
            store,
            telemetry,
            manager,
        }
    }

    fn private_options() -> SecurityOptions {
        SecurityOptions {
            passcode: Some("1234".to_string()),
            biometric: false,
            private_notes: true,
        }
    }

    #[test]
    fn save_without_security_is_plaintext_and_public() {
        let harness = harness();
        let saved = harness
            .manager
            .save_note(Note {
                private: true,
                ..Note::text("Shopping", "milk")
            })
            .expect("save");
        assert!(saved.id > 0);
        assert!(!saved.private);
        assert!(!saved.encrypted);

        let stored = harness.store.get_by_id(saved.id).expect("get").expect("exists");
        assert_eq!(stored.title, "Shopping");
    }

    #[test]
    fn private_mode_seals_saved_notes() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        assert_eq!(harness.manager.gate_state(), GateState::Unlocked);
        assert!(harness.manager.toggle_private_mode());

        let saved = harness
            .manager
            .save_note(Note::text("Secret", "x"))
            .expect("save");
        let stored = harness.store.get_by_id(saved.id).expect("get").expect("exists");
        assert!(stored.private);
        assert!(stored.encrypted);
        assert_eq!(stored.title, "");
        assert!(stored.encrypted_title.is_some());

        let loaded = harness.manager.get_note(saved.id).expect("load").expect("exists");
        assert_eq!(loaded.title, "Secret");
        assert_eq!(loaded.content(), "x");
    }

    #[test]
    fn toggle_is_noop_without_private_notes_feature() {
        let harness = harness();
        assert!(!harness.manager.toggle_private_mode());

        harness
            .manager
            .enable_security(&SecurityOptions {
                private_notes: false,
                ..private_options()
            })
            .expect("enable");
        assert!(!harness.manager.toggle_private_mode());
        assert!(!harness.manager.is_private_mode());
    }

    #[test]
    fn resaving_a_private_note_outside_private_mode_reseals_it() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        harness.manager.toggle_private_mode();
        let saved = harness
            .manager
            .save_note(Note::text("Secret", "x"))
            .expect("save");
        let before = harness.store.get_by_id(saved.id).expect("get").expect("exists");
        let mut revealed = harness.manager.get_note(saved.id).expect("load").expect("exists");

        assert!(!harness.manager.toggle_private_mode());
        revealed.title = "Edited".to_string();
        let resaved = harness.manager.save_note(revealed).expect("resave");
        assert!(resaved.private);

        let stored = harness.store.get_by_id(resaved.id).expect("get").expect("exists");
        assert!(stored.private);
        assert!(stored.encrypted);
        assert_eq!(stored.title, "");
        assert_ne!(stored.encrypted_title, before.encrypted_title);

        let loaded = harness.manager.get_note(saved.id).expect("load").expect("exists");
        assert_eq!(loaded.title, "Edited");
        assert_eq!(loaded.content(), "x");
    }

    #[test]
    fn archiving_a_private_note_outside_private_mode_keeps_it_sealed() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        harness.manager.toggle_private_mode();
        let saved = harness
            .manager
            .save_note(Note::text("Secret", "x"))
            .expect("save");
        assert!(!harness.manager.toggle_private_mode());

        let revealed = harness.manager.get_note(saved.id).expect("load").expect("exists");
        harness.manager.archive_note(revealed).expect("archive");

        let stored = harness.store.get_by_id(saved.id).expect("get").expect("exists");
        assert!(stored.archived);
        assert!(stored.private);
        assert!(stored.encrypted);
        assert_eq!(stored.title, "");
        let regular = harness
            .store
            .query(NoteQuery::ARCHIVED_REGULAR)
            .expect("query");
        assert!(regular.is_empty());
    }

    #[test]
    fn public_note_saved_in_private_mode_becomes_private() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        let saved = harness
            .manager
            .save_note(Note::text("Plain", ""))
            .expect("save");
        assert!(!saved.private);

        harness.manager.toggle_private_mode();
        let resaved = harness.manager.save_note(saved).expect("resave");
        assert!(resaved.private);
        assert!(resaved.encrypted);
    }

    #[test]
    fn concurrent_toggles_leave_view_on_the_final_mode() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        harness.manager.toggle_private_mode();
        let secret = harness
            .manager
            .save_note(Note::text("Secret", ""))
            .expect("save private");
        harness.manager.toggle_private_mode();
        let plain = harness
            .manager
            .save_note(Note::text("Plain", ""))
            .expect("save public");

        let manager = &harness.manager;
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        manager.toggle_private_mode();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..7 {
                    manager.toggle_private_mode();
                }
            });
        });

        // 107 flips from regular mode end in private mode.
        assert!(harness.manager.is_private_mode());
        let view = harness.manager.notes().expect("view");
        let settled = view
            .wait_for(WAIT, |notes| {
                notes.active.len() == 1 && notes.active[0].id == secret.id
            })
            .expect("gate open")
            .expect("view follows final mode");
        assert!(settled.active.iter().all(|note| note.id != plain.id));
    }

    #[test]
    fn status_reports_flags_and_gate() {
        let harness = harness();
        let status = harness.manager.status();
        assert!(!status.security_enabled);
        assert_eq!(status.key_version, None);
        assert_eq!(status.gate, GateState::Disabled);

        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        harness.manager.lock();
        let status = harness.manager.status();
        assert!(status.security_enabled);
        assert!(status.private_notes_enabled);
        assert!(!status.biometric_enabled);
        assert!(status.key_version.is_some());
        assert_eq!(status.gate, GateState::Locked);
    }

    #[test]
    fn archive_clears_pin() {
        let harness = harness();
        let saved = harness
            .manager
            .save_note(Note {
                pinned: true,
                ..Note::text("Pinned", "")
            })
            .expect("save");
        let archived = harness.manager.archive_note(saved).expect("archive");
        assert!(archived.archived);
        assert!(!archived.pinned);

        let restored = harness.manager.unarchive_note(archived).expect("unarchive");
        assert!(!restored.archived);
        assert!(!restored.pinned);
    }

    #[test]
    fn lock_blocks_content_until_passcode_unlock() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        let view = harness.manager.notes().expect("view");
        harness.manager.lock();
        assert_eq!(harness.manager.gate_state(), GateState::Locked);

        assert!(matches!(view.latest(), Err(SecurityError::Locked)));
        assert!(matches!(harness.manager.notes(), Err(SecurityError::Locked)));
        assert!(matches!(harness.manager.get_note(1), Err(SecurityError::Locked)));
        assert!(matches!(
            harness.manager.save_note(Note::text("x", "")),
            Err(SecurityError::Locked)
        ));

        let wrong = harness.manager.unlock_with_passcode("0000");
        assert!(matches!(wrong, Err(SecurityError::AuthenticationFailed)));
        assert!(matches!(
            harness.manager.unlock_with_biometric(&|| true),
            Err(SecurityError::BiometricDisabled)
        ));

        let state = harness.manager.unlock_with_passcode("1234").expect("unlock");
        assert_eq!(state, GateState::Unlocked);
        assert!(view.latest().is_ok());
    }

    #[test]
    fn biometric_oracle_unlocks_when_enabled() {
        let harness = harness();
        harness
            .manager
            .enable_security(&SecurityOptions {
                passcode: None,
                biometric: true,
                private_notes: false,
            })
            .expect("enable");
        harness.manager.lock();

        let denied = harness.manager.unlock_with_biometric(&|| false);
        assert!(matches!(denied, Err(SecurityError::AuthenticationFailed)));
        let state = harness
            .manager
            .unlock_with_biometric(&|| true)
            .expect("unlock");
        assert_eq!(state, GateState::Unlocked);
    }

    #[test]
    fn partial_migration_keeps_key_and_reports() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        harness.manager.toggle_private_mode();
        harness
            .manager
            .save_note(Note::text("Good", "fine"))
            .expect("save");
        let broken = harness
            .store
            .upsert(&Note {
                private: true,
                encrypted: true,
                encrypted_title: Some("{\"broken\":true}".to_string()),
                ..Note::text("", "")
            })
            .expect("insert broken");

        let result = harness.manager.disable_security();
        assert!(matches!(
            result,
            Err(SecurityError::MigrationIncomplete {
                migrated: 1,
                failed: 1
            })
        ));
        let status = harness.manager.status();
        assert!(status.security_enabled);
        assert!(status.key_version.is_some());
        assert_eq!(status.gate, GateState::Unlocked);

        let remaining = harness.store.get_all_encrypted().expect("encrypted");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, broken);
        assert_eq!(harness.telemetry.count("lifecycle", Severity::Error), 1);
    }

    #[test]
    fn disable_twice_is_harmless() {
        let harness = harness();
        harness
            .manager
            .enable_security(&private_options())
            .expect("enable");
        let first = harness.manager.disable_security().expect("disable");
        assert_eq!(first.migrated, 0);
        let second = harness.manager.disable_security().expect("disable again");
        assert_eq!(second.migrated, 0);
        assert_eq!(harness.manager.gate_state(), GateState::Disabled);
        assert!(!harness.manager.is_private_mode());
    }

    #[test]
    fn view_tracks_saved_notes() {
        let harness = harness();
        let view = harness.manager.notes().expect("view");
        harness
            .manager
            .save_note(Note::text("Shopping", "milk"))
            .expect("save");
        let latest = view
            .wait_for(WAIT, |notes| notes.active.len() == 1)
            .expect("gate open")
            .expect("emission");
        assert_eq!(latest.active[0].title, "Shopping");
    }

    struct FailingStore;

    impl NoteStore for FailingStore {
        fn upsert(&self, _note: &Note) -> Result<i64, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn delete_by_id(&self, _note_id: i64) -> Result<usize, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn get_by_id(&self, _note_id: i64) -> Result<Option<Note>, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn exists(&self, _note_id: i64) -> Result<bool, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn query(&self, _query: NoteQuery) -> Result<Vec<Note>, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn get_all_encrypted(&self) -> Result<Vec<Note>, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn watch(&self, _query: NoteQuery, _sink: SnapshotSink) -> Result<WatchId, StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }

        fn unwatch(&self, _id: WatchId) {}
    }

    #[test]
    fn store_failures_surface_as_errors_and_telemetry() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let vault = Arc::new(CryptoVault::new(
            Arc::new(MemorySettings::new()),
            telemetry.clone(),
        ));
        let manager = SecurityLifecycleManager::new(
            Arc::new(FailingStore),
            vault,
            telemetry.clone(),
            Duration::from_millis(100),
        );

        let saved = manager.save_note(Note::text("lost", ""));
        assert!(matches!(saved, Err(SecurityError::Store(_))));
        assert!(matches!(manager.delete_note(1), Err(SecurityError::Store(_))));
        assert_eq!(telemetry.count("lifecycle", Severity::Error), 2);
    }
}
