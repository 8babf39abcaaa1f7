//! The frontend over one backend transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use erx_crypto::{DbCodec, DictionaryUse, SymmetricKey};
use erx_db::models::TaskKeyData;
use erx_db::{ChargeItemRow, CmacKeyCategory, ErxBackend, TaskRow};
use erx_hsm::{KeyDerivation, KeyPurpose};
use erx_query::UrlArguments;
use erx_types::{
    AccessTokenIdentity, Blob, BlobId, ChargeInformation, ChargeItem, Communication, Consent,
    EncryptedBlob, ErxError, ErxResult, HashedId, IdentityHasher, Kvnr, MasterKeyType,
    MedicationDispense, PrescriptionId, Suuid, Task, TaskStatus, TelematikId,
};

/// A decrypted task together with the key it was decrypted under, for
/// callers that re-encrypt within the same transaction.
pub struct TaskAndKey {
    pub task: Task,
    pub key: Option<SymmetricKey>,
}

/// The sole mediator between plaintext entities and encrypted rows.
pub struct DatabaseFrontend {
    backend: ErxBackend,
    derivation: Arc<KeyDerivation>,
    codec: DbCodec,
}

impl DatabaseFrontend {
    pub fn new(backend: ErxBackend, derivation: Arc<KeyDerivation>) -> Self {
        Self {
            backend,
            derivation,
            codec: DbCodec::new(),
        }
    }

    pub fn backend(&self) -> &ErxBackend {
        &self.backend
    }

    pub(crate) fn parts(&self) -> (&ErxBackend, &KeyDerivation, &DbCodec) {
        (&self.backend, self.derivation.as_ref(), &self.codec)
    }

    pub fn derivation(&self) -> &KeyDerivation {
        self.derivation.as_ref()
    }

    pub fn commit_transaction(&mut self) -> ErxResult<()> {
        self.backend.commit_transaction()
    }

    pub fn close_connection(&mut self) {
        self.backend.close_connection()
    }

    pub fn retrieve_schema_version(&self) -> ErxResult<String> {
        self.backend.retrieve_schema_version()
    }

    pub fn health_check(&self) -> ErxResult<()> {
        self.backend.health_check()
    }

    /// Day-keyed CMAC key, first writer wins across all processes.
    pub fn acquire_cmac(
        &self,
        valid_date: chrono::NaiveDate,
        category: CmacKeyCategory,
    ) -> ErxResult<Vec<u8>> {
        let candidate = self
            .derivation
            .pool()
            .acquire()
            .session()
            .random_bytes(32)?;
        self.backend.acquire_cmac(valid_date, category, &candidate)
    }

    // ----- encode/decode helpers -------------------------------------------

    fn encode(
        &self,
        plaintext: &str,
        key: &SymmetricKey,
        dict_use: DictionaryUse,
    ) -> ErxResult<EncryptedBlob> {
        Ok(self.codec.encode(plaintext.as_bytes(), key, dict_use)?)
    }

    fn decode(
        &self,
        blob: &EncryptedBlob,
        key: &SymmetricKey,
        dict_use: DictionaryUse,
    ) -> ErxResult<String> {
        let bytes = self.codec.decode(blob, key, dict_use)?;
        String::from_utf8(bytes)
            .map_err(|_| ErxError::CryptoFailure("decoded plaintext is not UTF-8".to_string()))
    }

    // ----- task keys --------------------------------------------------------

    /// Key of an existing task, from the derivation data stored on its row.
    fn task_key_by_id(&self, task_id: &PrescriptionId) -> ErxResult<SymmetricKey> {
        let TaskKeyData {
            blob_id,
            salt,
            authored_on,
        } = self.backend.get_task_key_data(task_id)?;
        let blob_id =
            blob_id.ok_or_else(|| ErxError::logic(format!("missing blob id in task {task_id}")))?;
        let salt =
            salt.ok_or_else(|| ErxError::logic(format!("missing salt in task {task_id}")))?;
        self.derivation
            .task_key(task_id, authored_on, blob_id, &salt)
    }

    /// Key of a retrieved row; cancelled tasks have no key and no derivation
    /// happens for them.
    fn task_key_for_row(&self, row: &TaskRow) -> ErxResult<Option<SymmetricKey>> {
        if row.status == TaskStatus::Cancelled {
            return Ok(None);
        }
        let salt = row
            .salt
            .as_ref()
            .ok_or_else(|| ErxError::logic("missing salt in task"))?;
        let blob_id = row
            .blob_id
            .ok_or_else(|| ErxError::logic("missing blob id in task"))?;
        Ok(Some(self.derivation.task_key(
            &row.prescription_id,
            row.authored_on,
            blob_id,
            salt,
        )?))
    }

    // ----- race-protocol key helpers ---------------------------------------

    /// Key for the dispense bundles of one insurant. Derived from the KVNR,
    /// not from a task, so any pharmacy task of the same patient encrypts
    /// into the same key space.
    pub(crate) fn medication_dispense_key(
        &self,
        hashed_kvnr: &HashedId,
    ) -> ErxResult<(SymmetricKey, BlobId, Blob)> {
        let blob_id = self.derivation.latest_blob_id(KeyPurpose::Task)?;
        let salt = self.backend.retrieve_salt_for_account(
            hashed_kvnr,
            MasterKeyType::MedicationDispense,
            blob_id,
        )?;
        if let Some(salt) = salt {
            let key = self
                .derivation
                .medication_dispense_key(hashed_kvnr, blob_id, &salt)?;
            return Ok((key, blob_id, salt));
        }
        let (key, second_call_data) = self
            .derivation
            .initial_medication_dispense_key(hashed_kvnr)?;
        let new_salt = second_call_data.salt;
        let blob_id = second_call_data.blob_id;
        let db_salt = self.backend.insert_or_return_account_salt(
            hashed_kvnr,
            MasterKeyType::MedicationDispense,
            blob_id,
            &new_salt,
        )?;
        // there was a concurrent insert so we need to derive again with the
        // salt created by the concurrent, who was first to insert the salt
        if let Some(db_salt) = db_salt {
            let key = self
                .derivation
                .medication_dispense_key(hashed_kvnr, blob_id, &db_salt)?;
            return Ok((key, blob_id, db_salt));
        }
        Ok((key, blob_id, new_salt))
    }

    /// Key of one communication endpoint, same race protocol.
    pub(crate) fn communication_key_and_id(
        &self,
        identity: &str,
        identity_hashed: &HashedId,
    ) -> ErxResult<(SymmetricKey, BlobId)> {
        let blob_id = self.derivation.latest_blob_id(KeyPurpose::Communication)?;
        let salt = self.backend.retrieve_salt_for_account(
            identity_hashed,
            MasterKeyType::Communication,
            blob_id,
        )?;
        if let Some(salt) = salt {
            let key = self
                .derivation
                .communication_key(identity, identity_hashed, blob_id, &salt)?;
            return Ok((key, blob_id));
        }
        let (key, second_call_data) = self
            .derivation
            .initial_communication_key(identity, identity_hashed)?;
        let blob_id = second_call_data.blob_id;
        let db_salt = self.backend.insert_or_return_account_salt(
            identity_hashed,
            MasterKeyType::Communication,
            blob_id,
            &second_call_data.salt,
        )?;
        // concurrent insert: the first writer's salt wins
        if let Some(db_salt) = db_salt {
            let key = self
                .derivation
                .communication_key(identity, identity_hashed, blob_id, &db_salt)?;
            return Ok((key, blob_id));
        }
        Ok((key, blob_id))
    }

    // ----- tasks ------------------------------------------------------------

    /// Create the row first so the table assigns id and rounded authored-on,
    /// then derive the initial task key against the *stored* authored-on and
    /// persist the encrypted access code with the derivation salt.
    pub fn store_task(&self, task: &Task) -> ErxResult<PrescriptionId> {
        let (prescription_id, authored_on) = self.backend.create_task(
            task.flow_type,
            task.status,
            task.last_modified,
            task.authored_on,
            task.last_status_change,
        )?;

        tracing::debug!("created task {prescription_id}");
        let (key, derivation_data) = self
            .derivation
            .initial_task_key(&prescription_id, authored_on)?;

        let access_code = task
            .access_code
            .as_ref()
            .ok_or_else(|| ErxError::logic("access code not set in task during store"))?;
        let encrypted_access_code = self.encode(access_code, &key, DictionaryUse::DefaultJson)?;

        self.backend.update_task(
            &prescription_id,
            &encrypted_access_code,
            derivation_data.blob_id,
            &derivation_data.salt,
        )?;
        Ok(prescription_id)
    }

    pub fn update_task_status_and_secret(&self, task: &Task) -> ErxResult<()> {
        let task_id = required_id(task)?;
        let key = self.task_key_by_id(task_id)?;
        let secret = task
            .secret
            .as_ref()
            .map(|secret| self.encode(secret, &key, DictionaryUse::DefaultJson))
            .transpose()?;
        let owner = task
            .owner
            .as_ref()
            .map(|owner| self.encode(owner.as_str(), &key, DictionaryUse::DefaultJson))
            .transpose()?;
        self.backend.update_task_status_and_secret(
            task_id,
            task.status,
            task.last_modified,
            secret.as_ref(),
            owner.as_ref(),
            task.last_status_change,
        )
    }

    /// The draft→ready transition: encrypt KVNR, signed prescription and the
    /// prescriber identity snapshot under the task key.
    pub fn activate_task(
        &self,
        task: &Task,
        healthcare_provider_prescription: &str,
        doctor_identity: &AccessTokenIdentity,
    ) -> ErxResult<()> {
        let task_id = required_id(task)?;
        let key = self.task_key_by_id(task_id)?;

        let kvnr = task
            .kvnr
            .as_ref()
            .ok_or_else(|| ErxError::logic("KVNR not set in task during activate"))?;
        let encrypted_kvnr = self.encode(kvnr.as_str(), &key, DictionaryUse::DefaultJson)?;
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        let encrypted_prescription =
            self.encode(healthcare_provider_prescription, &key, DictionaryUse::DefaultJson)?;
        let encrypted_doctor_identity = self.encode(
            &doctor_identity.to_json_string()?,
            &key,
            DictionaryUse::DefaultJson,
        )?;

        let expiry_date = task
            .expiry_date
            .ok_or_else(|| ErxError::logic("expiry date not set in task during activate"))?;
        let accept_date = task
            .accept_date
            .ok_or_else(|| ErxError::logic("accept date not set in task during activate"))?;

        self.backend.activate_task(
            task_id,
            &encrypted_kvnr,
            &hashed_kvnr,
            task.status,
            task.last_modified,
            expiry_date,
            accept_date,
            &encrypted_prescription,
            &encrypted_doctor_identity,
            task.last_status_change,
        )
    }

    pub fn update_task_receipt(
        &self,
        task: &Task,
        receipt: &str,
        pharmacy_identity: &AccessTokenIdentity,
    ) -> ErxResult<()> {
        let task_id = required_id(task)?;
        let key = self.task_key_by_id(task_id)?;
        let encrypted_receipt = self.encode(receipt, &key, DictionaryUse::DefaultJson)?;
        let encrypted_pharmacy_identity = self.encode(
            &pharmacy_identity.to_json_string()?,
            &key,
            DictionaryUse::DefaultJson,
        )?;
        self.backend.update_task_receipt(
            task_id,
            task.status,
            task.last_modified,
            &encrypted_receipt,
            &encrypted_pharmacy_identity,
            task.last_status_change,
        )
    }

    /// Store a dispense bundle under the insurant's key space.
    pub fn update_task_medication_dispense(
        &self,
        task: &Task,
        medication_dispense_bundle: &str,
        performer: &TelematikId,
        when_handed_over: DateTime<Utc>,
        when_prepared: Option<DateTime<Utc>>,
    ) -> ErxResult<()> {
        let task_id = required_id(task)?;
        let kvnr = task.kvnr.as_ref().ok_or_else(|| {
            ErxError::internal("cannot update medication dispense for task without kvnr")
        })?;
        let last_medication_dispense = task.last_medication_dispense.ok_or_else(|| {
            ErxError::internal(
                "cannot update medication dispense for task without a dispense timestamp",
            )
        })?;
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        let hashed_performer = self.derivation.hash_telematik_id(performer)?;

        let (dispense_key, blob_id, salt) = self.medication_dispense_key(&hashed_kvnr)?;
        let encrypted_bundle =
            self.encode(medication_dispense_bundle, &dispense_key, DictionaryUse::DefaultJson)?;

        self.backend.update_task_medication_dispense(
            task_id,
            task.last_modified,
            last_medication_dispense,
            &encrypted_bundle,
            blob_id,
            &hashed_performer,
            when_handed_over,
            when_prepared,
            &salt,
        )
    }

    /// The close transition: dispense bundle under the insurant key, receipt
    /// and pharmacy identity under the task key, one statement.
    #[allow(clippy::too_many_arguments)]
    pub fn update_task_medication_dispense_receipt(
        &self,
        task: &Task,
        medication_dispense_bundle: &str,
        performer: &TelematikId,
        when_handed_over: DateTime<Utc>,
        when_prepared: Option<DateTime<Utc>>,
        receipt: &str,
        pharmacy_identity: &AccessTokenIdentity,
    ) -> ErxResult<()> {
        let task_id = required_id(task)?;
        let key = self.task_key_by_id(task_id)?;
        let kvnr = task.kvnr.as_ref().ok_or_else(|| {
            ErxError::internal("cannot update medication dispense for task without kvnr")
        })?;
        let last_medication_dispense = task.last_medication_dispense.ok_or_else(|| {
            ErxError::internal(
                "cannot update medication dispense for task without a dispense timestamp",
            )
        })?;
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        let hashed_performer = self.derivation.hash_telematik_id(performer)?;

        let (dispense_key, blob_id, salt) = self.medication_dispense_key(&hashed_kvnr)?;
        let encrypted_bundle =
            self.encode(medication_dispense_bundle, &dispense_key, DictionaryUse::DefaultJson)?;
        let encrypted_receipt = self.encode(receipt, &key, DictionaryUse::DefaultJson)?;
        let encrypted_pharmacy_identity = self.encode(
            &pharmacy_identity.to_json_string()?,
            &key,
            DictionaryUse::DefaultJson,
        )?;

        self.backend.update_task_medication_dispense_receipt(
            task_id,
            task.status,
            task.last_modified,
            &encrypted_bundle,
            blob_id,
            &hashed_performer,
            when_handed_over,
            when_prepared,
            &encrypted_receipt,
            last_medication_dispense,
            &salt,
            &encrypted_pharmacy_identity,
            task.last_status_change,
        )
    }

    pub fn update_task_delete_medication_dispense(&self, task: &Task) -> ErxResult<()> {
        self.backend
            .update_task_delete_medication_dispense(required_id(task)?, task.last_modified)
    }

    /// The cancel transition. No key is touched; the backend nulls every
    /// encrypted column.
    pub fn update_task_clear_personal_data(&self, task: &Task) -> ErxResult<()> {
        self.backend.update_task_clear_personal_data(
            required_id(task)?,
            task.status,
            task.last_modified,
            task.last_status_change,
        )
    }

    pub fn retrieve_task(&self, task_id: &PrescriptionId) -> ErxResult<Option<Task>> {
        let Some(row) = self.backend.retrieve_task(task_id)? else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        Ok(Some(self.task_from_row(&row, key.as_ref())?))
    }

    pub fn retrieve_task_for_update(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<TaskAndKey>> {
        let Some(row) = self.backend.retrieve_task_for_update(task_id)? else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        Ok(Some(TaskAndKey { task, key }))
    }

    pub fn retrieve_task_for_update_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<(TaskAndKey, Option<String>)>> {
        let Some(row) = self.backend.retrieve_task_for_update_and_prescription(task_id)? else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        let prescription = self.optional_decode(&row.healthcare_provider_prescription, &key)?;
        Ok(Some((TaskAndKey { task, key }, prescription)))
    }

    pub fn retrieve_task_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<(Task, Option<String>)>> {
        let Some(row) = self.backend.retrieve_task_and_prescription(task_id)? else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        let prescription = self.optional_decode(&row.healthcare_provider_prescription, &key)?;
        Ok(Some((task, prescription)))
    }

    pub fn retrieve_task_with_secret_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<(TaskAndKey, Option<String>)>> {
        let Some(row) = self
            .backend
            .retrieve_task_with_secret_and_prescription(task_id)?
        else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        let prescription = self.optional_decode(&row.healthcare_provider_prescription, &key)?;
        Ok(Some((TaskAndKey { task, key }, prescription)))
    }

    pub fn retrieve_task_and_receipt(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<(Task, Option<String>)>> {
        let Some(row) = self.backend.retrieve_task_and_receipt(task_id)? else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        let receipt = self.optional_decode(&row.receipt, &key)?;
        Ok(Some((task, receipt)))
    }

    pub fn retrieve_task_and_prescription_and_receipt(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<(Task, Option<String>, Option<String>)>> {
        let Some(row) = self
            .backend
            .retrieve_task_and_prescription_and_receipt(task_id)?
        else {
            return Ok(None);
        };
        let key = self.task_key_for_row(&row)?;
        let task = self.task_from_row(&row, key.as_ref())?;
        let prescription = self.optional_decode(&row.healthcare_provider_prescription, &key)?;
        let receipt = self.optional_decode(&row.receipt, &key)?;
        Ok(Some((task, prescription, receipt)))
    }

    pub fn retrieve_all_tasks_for_patient(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<Task>> {
        self.list_tasks(kvnr, search, false)
    }

    /// Flow-160 listing variant exposing the access code.
    pub fn retrieve_all_tasks_with_access_code(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<Task>> {
        self.list_tasks(kvnr, search, true)
    }

    fn list_tasks(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
        with_access_code: bool,
    ) -> ErxResult<Vec<Task>> {
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        let rows =
            self.backend
                .retrieve_all_tasks_for_patient(&hashed_kvnr, search, with_access_code)?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self.task_key_for_row(&row)?;
            tasks.push(self.task_from_row(&row, key.as_ref())?);
        }
        Ok(tasks)
    }

    pub fn count_all_tasks_for_patient(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        self.backend.count_all_tasks_for_patient(&hashed_kvnr, search)
    }

    pub fn count_all_160_tasks(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        self.backend.count_all_160_tasks(&hashed_kvnr, search)
    }

    fn task_from_row(&self, row: &TaskRow, key: Option<&SymmetricKey>) -> ErxResult<Task> {
        let kvnr = match (&row.kvnr, key) {
            (Some(blob), Some(key)) => Some(Kvnr::new(self.decode(
                blob,
                key,
                DictionaryUse::DefaultJson,
            )?)),
            _ => None,
        };
        let access_code = match (&row.access_code, key) {
            (Some(blob), Some(key)) => {
                Some(self.decode(blob, key, DictionaryUse::DefaultJson)?)
            }
            _ => None,
        };
        let secret = match (&row.secret, key) {
            (Some(blob), Some(key)) => {
                Some(self.decode(blob, key, DictionaryUse::DefaultJson)?)
            }
            _ => None,
        };
        let owner = match (&row.owner, key) {
            (Some(blob), Some(key)) => Some(TelematikId::new(self.decode(
                blob,
                key,
                DictionaryUse::DefaultJson,
            )?)),
            _ => None,
        };
        Ok(Task {
            prescription_id: Some(row.prescription_id),
            flow_type: row.prescription_id.flow_type(),
            status: row.status,
            authored_on: row.authored_on,
            last_modified: row.last_modified,
            last_status_change: row.last_status_update,
            kvnr,
            expiry_date: row.expiry_date,
            accept_date: row.accept_date,
            access_code,
            secret,
            owner,
            last_medication_dispense: row.last_medication_dispense,
        })
    }

    fn optional_decode(
        &self,
        blob: &Option<EncryptedBlob>,
        key: &Option<SymmetricKey>,
    ) -> ErxResult<Option<String>> {
        match (blob, key) {
            (Some(blob), Some(key)) => {
                Ok(Some(self.decode(blob, key, DictionaryUse::DefaultJson)?))
            }
            _ => Ok(None),
        }
    }

    // ----- medication dispenses --------------------------------------------

    /// Dispense bundles of one insurant. Keys are re-derived at most once
    /// per distinct generation encountered.
    pub fn retrieve_medication_dispenses(
        &self,
        kvnr: &Kvnr,
        prescription_id: Option<&PrescriptionId>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<MedicationDispense>> {
        let hashed_kvnr = self.derivation.hash_kvnr(kvnr)?;
        let rows = self.backend.retrieve_all_medication_dispenses(
            &hashed_kvnr,
            prescription_id,
            search,
        )?;
        let mut keys: std::collections::HashMap<BlobId, SymmetricKey> =
            std::collections::HashMap::new();
        let mut dispenses = Vec::with_capacity(rows.len());
        for row in rows {
            if !keys.contains_key(&row.blob_id) {
                let key = self.derivation.medication_dispense_key(
                    &hashed_kvnr,
                    row.blob_id,
                    &row.salt,
                )?;
                keys.insert(row.blob_id, key);
            }
            let key = &keys[&row.blob_id];
            dispenses.push(MedicationDispense {
                prescription_id: row.prescription_id,
                bundle: self.decode(&row.bundle, key, DictionaryUse::DefaultJson)?,
            });
        }
        Ok(dispenses)
    }

    // ----- communications ---------------------------------------------------

    /// Encrypt the same plaintext twice, once per endpoint, each under that
    /// endpoint's own key.
    pub fn insert_communication(&self, communication: &mut Communication) -> ErxResult<Suuid> {
        let message_plain = communication.to_json_string()?;

        let sender_hashed = self.derivation.hash_identity(&communication.sender)?;
        let recipient_hashed = self.derivation.hash_identity(&communication.recipient)?;
        let (sender_key, sender_blob_id) =
            self.communication_key_and_id(&communication.sender, &sender_hashed)?;
        let (recipient_key, recipient_blob_id) =
            self.communication_key_and_id(&communication.recipient, &recipient_hashed)?;

        let message_for_sender =
            self.encode(&message_plain, &sender_key, DictionaryUse::DefaultJson)?;
        let message_for_recipient =
            self.encode(&message_plain, &recipient_key, DictionaryUse::DefaultJson)?;

        let id = self.backend.insert_communication(
            &communication.prescription_id,
            communication.sent,
            communication.message_type,
            &sender_hashed,
            &recipient_hashed,
            sender_blob_id,
            &message_for_sender,
            recipient_blob_id,
            &message_for_recipient,
        )?;
        communication.id = Some(id);
        Ok(id)
    }

    /// Messages of one user, decrypted with the copy matching their side.
    /// Keys are memoized per generation.
    pub fn retrieve_communications(
        &self,
        user: &str,
        communication_id: Option<&Suuid>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<Communication>> {
        let hashed_user = self.derivation.hash_identity(user)?;
        let rows =
            self.backend
                .retrieve_communications(&hashed_user, communication_id, search)?;
        let mut keys: std::collections::HashMap<BlobId, SymmetricKey> =
            std::collections::HashMap::new();
        let mut communications = Vec::with_capacity(rows.len());
        for row in rows {
            if !keys.contains_key(&row.blob_id) {
                let salt = row
                    .salt
                    .as_ref()
                    .ok_or_else(|| ErxError::internal("salt not found for communication key"))?;
                let key =
                    self.derivation
                        .communication_key(user, &hashed_user, row.blob_id, salt)?;
                keys.insert(row.blob_id, key);
            }
            let key = &keys[&row.blob_id];
            let message_json = self.decode(&row.message, key, DictionaryUse::DefaultJson)?;
            let mut communication = Communication::from_json_str(&message_json)?;
            // id and received time exist only on the row, not in the stored
            // message payload
            communication.id = Some(row.id);
            communication.received = row.received;
            communications.push(communication);
        }
        Ok(communications)
    }

    pub fn count_communications(
        &self,
        user: &str,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        let hashed_user = self.derivation.hash_identity(user)?;
        self.backend.count_communications(&hashed_user, search)
    }

    pub fn count_representative_communications(
        &self,
        insurant_a: &Kvnr,
        insurant_b: &Kvnr,
        prescription_id: &PrescriptionId,
    ) -> ErxResult<u64> {
        self.backend.count_representative_communications(
            &self.derivation.hash_kvnr(insurant_a)?,
            &self.derivation.hash_kvnr(insurant_b)?,
            prescription_id,
        )
    }

    pub fn exist_communication(&self, communication_id: &Suuid) -> ErxResult<bool> {
        self.backend.exist_communication(communication_id)
    }

    pub fn retrieve_communication_ids(&self, recipient: &str) -> ErxResult<Vec<Suuid>> {
        let hashed = self.derivation.hash_identity(recipient)?;
        self.backend.retrieve_communication_ids(&hashed)
    }

    pub fn delete_communication(
        &self,
        communication_id: &Suuid,
        sender: &str,
    ) -> ErxResult<Option<(Suuid, Option<DateTime<Utc>>)>> {
        let hashed = self.derivation.hash_identity(sender)?;
        self.backend.delete_communication(communication_id, &hashed)
    }

    pub fn mark_communications_retrieved(
        &self,
        communication_ids: &[Suuid],
        retrieved: DateTime<Utc>,
        recipient: &str,
    ) -> ErxResult<()> {
        let hashed = self.derivation.hash_identity(recipient)?;
        self.backend
            .mark_communications_retrieved(communication_ids, retrieved, &hashed)
    }

    pub fn delete_communications_for_task(&self, task_id: &PrescriptionId) -> ErxResult<()> {
        self.backend.delete_communications_for_task(task_id)
    }

    pub fn delete_communications_for_charge_item(
        &self,
        charge_item_id: &PrescriptionId,
    ) -> ErxResult<()> {
        self.backend
            .delete_communications_for_charge_item(charge_item_id)
    }

    pub fn clear_all_charge_item_communications(&self, kvnr: &Kvnr) -> ErxResult<()> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        self.backend.delete_charge_item_communications_for_kvnr(&hashed)
    }

    // ----- consent ----------------------------------------------------------

    pub fn store_consent(&self, consent: &Consent) -> ErxResult<()> {
        let hashed = self.derivation.hash_kvnr(&consent.kvnr)?;
        self.backend.store_consent(&hashed, consent.date_time)
    }

    pub fn retrieve_consent(&self, kvnr: &Kvnr) -> ErxResult<Option<Consent>> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        Ok(self
            .backend
            .retrieve_consent_date_time(&hashed)?
            .map(|date_time| Consent {
                kvnr: kvnr.clone(),
                date_time,
            }))
    }

    pub fn clear_consent(&self, kvnr: &Kvnr) -> ErxResult<bool> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        self.backend.clear_consent(&hashed)
    }

    // ----- charge items -----------------------------------------------------

    pub fn store_charge_information(&self, charge_information: &ChargeInformation) -> ErxResult<()> {
        let charge_item = &charge_information.charge_item;
        let prescription_id = &charge_item.prescription_id;
        let (key, derivation_data) = self.derivation.initial_charge_item_key(prescription_id)?;
        let row = self.charge_item_row(
            charge_information,
            &key,
            derivation_data.blob_id,
            derivation_data.salt,
        )?;
        let hashed_kvnr = self.derivation.hash_kvnr(&charge_item.kvnr)?;
        self.backend.store_charge_information(&row, &hashed_kvnr)
    }

    /// Re-encrypt the changeable parts under the row's existing key.
    pub fn update_charge_information(
        &self,
        charge_information: &ChargeInformation,
    ) -> ErxResult<()> {
        let prescription_id = &charge_information.charge_item.prescription_id;
        let existing = self.backend.retrieve_charge_information(prescription_id)?;
        let key =
            self.derivation
                .charge_item_key(prescription_id, existing.blob_id, &existing.salt)?;

        let marking_flags = charge_information
            .charge_item
            .marking_flags
            .as_ref()
            .map(|flags| self.encode(flags, &key, DictionaryUse::DefaultJson))
            .transpose()?;
        let billing_data = self.encode(
            &charge_information.dispense_item,
            &key,
            DictionaryUse::DefaultXml,
        )?;
        let billing_data_json = self.encode(
            &charge_information.unsigned_dispense_item,
            &key,
            DictionaryUse::DefaultJson,
        )?;
        self.backend.update_charge_information(
            prescription_id,
            marking_flags.as_ref(),
            &billing_data,
            &billing_data_json,
            charge_information.charge_item.last_modified,
        )
    }

    pub fn retrieve_charge_information(
        &self,
        prescription_id: &PrescriptionId,
    ) -> ErxResult<ChargeInformation> {
        let row = self.backend.retrieve_charge_information(prescription_id)?;
        let key =
            self.derivation
                .charge_item_key(prescription_id, row.blob_id, &row.salt)?;
        self.charge_information_from_row(&row, &key)
    }

    /// Charge item metadata of one insurant; payload columns stay encrypted
    /// and undecoded for listings.
    pub fn retrieve_all_charge_items(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<ChargeItem>> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        let rows = self
            .backend
            .retrieve_all_charge_items_for_insurant(&hashed, search)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self.derivation.charge_item_key(
                &row.prescription_id,
                row.blob_id,
                &row.salt,
            )?;
            items.push(self.charge_item_from_row(&row, &key)?);
        }
        Ok(items)
    }

    pub fn count_charge_information_for_insurant(
        &self,
        kvnr: &Kvnr,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        self.backend.count_charge_information_for_insurant(&hashed, search)
    }

    pub fn delete_charge_information(&self, prescription_id: &PrescriptionId) -> ErxResult<()> {
        self.backend.delete_charge_information(prescription_id)
    }

    pub fn clear_all_charge_information(&self, kvnr: &Kvnr) -> ErxResult<()> {
        let hashed = self.derivation.hash_kvnr(kvnr)?;
        self.backend.clear_all_charge_information(&hashed)
    }

    fn charge_item_row(
        &self,
        charge_information: &ChargeInformation,
        key: &SymmetricKey,
        blob_id: BlobId,
        salt: Blob,
    ) -> ErxResult<ChargeItemRow> {
        let charge_item = &charge_information.charge_item;
        Ok(ChargeItemRow {
            prescription_id: charge_item.prescription_id,
            enterer: self.encode(charge_item.enterer.as_str(), key, DictionaryUse::DefaultJson)?,
            entered_date: charge_item.entered_date,
            last_modified: charge_item.last_modified,
            marking_flags: charge_item
                .marking_flags
                .as_ref()
                .map(|flags| self.encode(flags, key, DictionaryUse::DefaultJson))
                .transpose()?,
            blob_id,
            salt,
            access_code: self.encode(&charge_item.access_code, key, DictionaryUse::DefaultJson)?,
            kvnr: self.encode(charge_item.kvnr.as_str(), key, DictionaryUse::DefaultJson)?,
            prescription: self.encode(
                &charge_information.prescription,
                key,
                DictionaryUse::DefaultXml,
            )?,
            prescription_json: self.encode(
                &charge_information.unsigned_prescription,
                key,
                DictionaryUse::DefaultJson,
            )?,
            receipt_xml: self.encode(
                &charge_information.receipt,
                key,
                DictionaryUse::DefaultXml,
            )?,
            receipt_json: self.encode(
                &charge_information.unsigned_receipt,
                key,
                DictionaryUse::DefaultJson,
            )?,
            billing_data: self.encode(
                &charge_information.dispense_item,
                key,
                DictionaryUse::DefaultXml,
            )?,
            billing_data_json: self.encode(
                &charge_information.unsigned_dispense_item,
                key,
                DictionaryUse::DefaultJson,
            )?,
        })
    }

    fn charge_item_from_row(
        &self,
        row: &ChargeItemRow,
        key: &SymmetricKey,
    ) -> ErxResult<ChargeItem> {
        Ok(ChargeItem {
            prescription_id: row.prescription_id,
            enterer: TelematikId::new(self.decode(
                &row.enterer,
                key,
                DictionaryUse::DefaultJson,
            )?),
            kvnr: Kvnr::new(self.decode(&row.kvnr, key, DictionaryUse::DefaultJson)?),
            entered_date: row.entered_date,
            last_modified: row.last_modified,
            access_code: self.decode(&row.access_code, key, DictionaryUse::DefaultJson)?,
            marking_flags: row
                .marking_flags
                .as_ref()
                .map(|flags| self.decode(flags, key, DictionaryUse::DefaultJson))
                .transpose()?,
        })
    }

    fn charge_information_from_row(
        &self,
        row: &ChargeItemRow,
        key: &SymmetricKey,
    ) -> ErxResult<ChargeInformation> {
        Ok(ChargeInformation {
            charge_item: self.charge_item_from_row(row, key)?,
            prescription: self.decode(&row.prescription, key, DictionaryUse::DefaultXml)?,
            unsigned_prescription: self.decode(
                &row.prescription_json,
                key,
                DictionaryUse::DefaultJson,
            )?,
            dispense_item: self.decode(&row.billing_data, key, DictionaryUse::DefaultXml)?,
            unsigned_dispense_item: self.decode(
                &row.billing_data_json,
                key,
                DictionaryUse::DefaultJson,
            )?,
            receipt: self.decode(&row.receipt_xml, key, DictionaryUse::DefaultXml)?,
            unsigned_receipt: self.decode(&row.receipt_json, key, DictionaryUse::DefaultJson)?,
        })
    }
}

fn required_id(task: &Task) -> ErxResult<&PrescriptionId> {
    task.prescription_id
        .as_ref()
        .ok_or_else(|| ErxError::logic("task has no prescription id"))
}
