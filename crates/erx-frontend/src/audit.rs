//! The audit log writer.
//!
//! Every access to sensitive data appends one encrypted audit entry. The
//! writer owns the salt coordination for audit keys; metadata is encrypted
//! only when the event kind carries any.

use std::collections::HashMap;

use erx_crypto::{DictionaryUse, SymmetricKey};
use erx_hsm::KeyPurpose;
use erx_query::UrlArguments;
use erx_types::{
    AuditAction, AuditAgentType, AuditData, AuditEventId, AuditMetaData, BlobId, ErxError,
    ErxResult, HashedId, Kvnr, MasterKeyType, PrescriptionId, Suuid,
};

use crate::frontend::DatabaseFrontend;

impl DatabaseFrontend {
    /// Key for audit metadata of one insurant, with the salt race protocol.
    fn audit_event_key(&self, hashed_kvnr: &HashedId) -> ErxResult<(SymmetricKey, BlobId)> {
        let (backend, derivation, _) = self.parts();
        let blob_id = derivation.latest_blob_id(KeyPurpose::AuditLog)?;
        let salt =
            backend.retrieve_salt_for_account(hashed_kvnr, MasterKeyType::AuditEvent, blob_id)?;
        if let Some(salt) = salt {
            return Ok((
                derivation.audit_event_key(hashed_kvnr, blob_id, &salt)?,
                blob_id,
            ));
        }
        let (key, second_call_data) = derivation.initial_audit_event_key(hashed_kvnr)?;
        let blob_id = second_call_data.blob_id;
        let db_salt = backend.insert_or_return_account_salt(
            hashed_kvnr,
            MasterKeyType::AuditEvent,
            blob_id,
            &second_call_data.salt,
        )?;
        // concurrent insert: re-derive with the first writer's salt
        if let Some(db_salt) = db_salt {
            return Ok((
                derivation.audit_event_key(hashed_kvnr, blob_id, &db_salt)?,
                blob_id,
            ));
        }
        Ok((key, blob_id))
    }

    /// Append one audit entry; fills in the generated id and recorded time.
    pub fn store_audit_event(&self, audit_data: &mut AuditData) -> ErxResult<Suuid> {
        let (backend, derivation, codec) = self.parts();
        let hashed_kvnr = derivation.hash_kvnr(&audit_data.insurant)?;

        let mut encrypted_metadata = None;
        let mut blob_id = None;
        if !audit_data.metadata.is_empty() {
            let (key, audit_blob_id) = self.audit_event_key(&hashed_kvnr)?;
            encrypted_metadata = Some(codec.encode(
                audit_data.metadata.to_json_string()?.as_bytes(),
                &key,
                DictionaryUse::DefaultJson,
            )?);
            blob_id = Some(audit_blob_id);
        }

        let (id, recorded) = backend.store_audit_event_data(
            &hashed_kvnr,
            audit_data.event_id.as_i16(),
            audit_data.action.as_char(),
            audit_data.agent_type.as_i16(),
            audit_data.device_id,
            audit_data.prescription_id.as_ref(),
            encrypted_metadata.as_ref(),
            blob_id,
        )?;
        audit_data.id = Some(id);
        audit_data.recorded = Some(recorded);
        Ok(id)
    }

    /// Audit entries of one insurant. Keys are re-derived at most once per
    /// distinct generation encountered in the result set.
    pub fn retrieve_audit_events(
        &self,
        kvnr: &Kvnr,
        id: Option<&Suuid>,
        prescription_id: Option<&PrescriptionId>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<AuditData>> {
        let (backend, derivation, codec) = self.parts();
        let hashed_kvnr = derivation.hash_kvnr(kvnr)?;
        let rows = backend.retrieve_audit_event_data(&hashed_kvnr, id, prescription_id, search)?;

        let mut keys: HashMap<BlobId, SymmetricKey> = HashMap::new();
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata = match &row.metadata {
                Some(encrypted) => {
                    let blob_id = row.blob_id.ok_or_else(|| {
                        ErxError::internal("blob id must be set when audit metadata exists")
                    })?;
                    if !keys.contains_key(&blob_id) {
                        let salt = backend
                            .retrieve_salt_for_account(
                                &hashed_kvnr,
                                MasterKeyType::AuditEvent,
                                blob_id,
                            )?
                            .ok_or_else(|| {
                                ErxError::internal("salt not found for audit metadata key")
                            })?;
                        keys.insert(
                            blob_id,
                            derivation.audit_event_key(&hashed_kvnr, blob_id, &salt)?,
                        );
                    }
                    let json = codec.decode(encrypted, &keys[&blob_id], DictionaryUse::DefaultJson)?;
                    AuditMetaData::from_json_str(&String::from_utf8(json).map_err(|_| {
                        ErxError::CryptoFailure("decoded plaintext is not UTF-8".to_string())
                    })?)?
                }
                None => AuditMetaData {
                    agent_name: None,
                    agent_who: None,
                },
            };
            events.push(AuditData {
                id: Some(row.id),
                event_id: AuditEventId::from_i16(row.event_id)?,
                action: AuditAction::from_char(row.action)?,
                agent_type: AuditAgentType::from_i16(row.agent_type)?,
                insurant: kvnr.clone(),
                device_id: row.device_id,
                prescription_id: row.prescription_id,
                metadata,
                recorded: Some(row.recorded),
            });
        }
        Ok(events)
    }
}
