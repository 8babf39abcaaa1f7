//! Communication CRUD.
//!
//! Every message is stored twice, encrypted once per endpoint; retrieval
//! selects the copy matching the caller's side and joins the account table
//! for the salt of that side's key. The sent time is encoded in the id.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use erx_query::UrlArguments;
use erx_types::{
    timestamp, Blob, BlobId, EncryptedBlob, ErxResult, HashedId, MessageType, PrescriptionId,
    Suuid,
};

use crate::backend::{db_error, ErxBackend};
use crate::models::CommunicationRow;

/// `master_key_type` of communication salts in the account table.
const COMMUNICATION_KEY_TYPE: i16 = 2;

impl ErxBackend {
    /// Insert one message with both ciphertexts. The id embeds the sent
    /// time, so listings sorted by id are sorted by time.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_communication(
        &self,
        prescription_id: &PrescriptionId,
        time_sent: DateTime<Utc>,
        message_type: MessageType,
        sender: &HashedId,
        recipient: &HashedId,
        sender_blob_id: BlobId,
        message_for_sender: &EncryptedBlob,
        recipient_blob_id: BlobId,
        message_for_recipient: &EncryptedBlob,
    ) -> ErxResult<Suuid> {
        self.check_preconditions()?;
        let id = Suuid::generate(time_sent)?;
        self.connection
            .execute(
                "INSERT INTO communication (id, message_type, sender, recipient, received,
                        prescription_id, prescription_type, sender_blob_id, message_for_sender,
                        recipient_blob_id, message_for_recipient)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    message_type.as_i16(),
                    sender.as_bytes(),
                    recipient.as_bytes(),
                    prescription_id.database_id(),
                    prescription_id.flow_type().code(),
                    sender_blob_id,
                    message_for_sender.as_bytes(),
                    recipient_blob_id,
                    message_for_recipient.as_bytes()
                ],
            )
            .map_err(db_error)?;
        Ok(id)
    }

    /// Messages visible to one user (as sender or recipient), optionally
    /// narrowed to one id, with the user's ciphertext and salt.
    pub fn retrieve_communications(
        &self,
        user: &HashedId,
        communication_id: Option<&Suuid>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<CommunicationRow>> {
        self.check_preconditions()?;
        let mut sql = format!(
            "WITH communication_for_user AS (
                SELECT c.id, c.received, c.sender, c.recipient, c.message_for_sender AS message,
                       c.sender_blob_id AS blob_id, sender_account.salt AS salt
                    FROM communication c
                    LEFT JOIN account sender_account ON
                        sender_account.account_id = c.sender AND
                        sender_account.master_key_type = {COMMUNICATION_KEY_TYPE} AND
                        sender_account.blob_id = c.sender_blob_id
                    WHERE c.sender = ?1
                UNION
                SELECT c.id, c.received, c.sender, c.recipient, c.message_for_recipient AS message,
                       c.recipient_blob_id AS blob_id, recipient_account.salt AS salt
                    FROM communication c
                    LEFT JOIN account recipient_account ON
                        recipient_account.account_id = c.recipient AND
                        recipient_account.master_key_type = {COMMUNICATION_KEY_TYPE} AND
                        recipient_account.blob_id = c.recipient_blob_id
                    WHERE c.recipient = ?1
             )
             SELECT id, received, message, blob_id, salt FROM communication_for_user
             WHERE (?2 IS NULL OR id = ?2)"
        );
        if let Some(search) = search {
            sql.push_str(&search.sql_expression("", false)?);
        }
        tracing::trace!("{sql}");
        let mut statement = self.connection.prepare(&sql).map_err(db_error)?;
        let rows = statement
            .query_map(
                params![user.as_bytes(), communication_id.map(Suuid::to_string)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, Option<Vec<u8>>>(4)?,
                    ))
                },
            )
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let mut communications = Vec::with_capacity(rows.len());
        for (id, received, message, blob_id, salt) in rows {
            communications.push(CommunicationRow {
                id: Suuid::parse(&id)?,
                received: received
                    .map(|text| timestamp::parse_db_timestamp(&text))
                    .transpose()?,
                message: EncryptedBlob::new(message),
                blob_id,
                salt: salt.map(Blob::new),
            });
        }
        Ok(communications)
    }

    pub fn count_communications(
        &self,
        user: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        self.check_preconditions()?;
        let mut sql =
            String::from("SELECT COUNT(*) FROM communication WHERE (recipient = ?1 OR sender = ?1)");
        if let Some(search) = search {
            let where_expression = search.sql_where_expression("")?;
            if !where_expression.is_empty() {
                sql.push_str(" AND ");
                sql.push_str(&where_expression);
            }
        }
        let count: i64 = self
            .connection
            .query_row(&sql, params![user.as_bytes()], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count as u64)
    }

    /// Representative messages between two insurants on one prescription,
    /// counted symmetrically.
    pub fn count_representative_communications(
        &self,
        insurant_a: &HashedId,
        insurant_b: &HashedId,
        prescription_id: &PrescriptionId,
    ) -> ErxResult<u64> {
        self.check_preconditions()?;
        let count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM communication
                 WHERE message_type = ?1 AND prescription_id = ?4 AND prescription_type = ?5
                   AND ((sender = ?2 AND recipient = ?3) OR (sender = ?3 AND recipient = ?2))",
                params![
                    MessageType::Representative.as_i16(),
                    insurant_a.as_bytes(),
                    insurant_b.as_bytes(),
                    prescription_id.database_id(),
                    prescription_id.flow_type().code()
                ],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count as u64)
    }

    pub fn exist_communication(&self, communication_id: &Suuid) -> ErxResult<bool> {
        self.check_preconditions()?;
        let count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM communication WHERE id = ?1",
                params![communication_id.to_string()],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count > 0)
    }

    /// Ids of all messages addressed to one recipient.
    pub fn retrieve_communication_ids(&self, recipient: &HashedId) -> ErxResult<Vec<Suuid>> {
        self.check_preconditions()?;
        let mut statement = self
            .connection
            .prepare("SELECT id FROM communication WHERE recipient = ?1")
            .map_err(db_error)?;
        let ids = statement
            .query_map(params![recipient.as_bytes()], |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        ids.iter().map(|id| Suuid::parse(id)).collect()
    }

    /// Delete one message; only its sender may. Returns the id and received
    /// time of the deleted row.
    pub fn delete_communication(
        &self,
        communication_id: &Suuid,
        sender: &HashedId,
    ) -> ErxResult<Option<(Suuid, Option<DateTime<Utc>>)>> {
        self.check_preconditions()?;
        let deleted: Option<(String, Option<String>)> = self
            .connection
            .query_row(
                "DELETE FROM communication WHERE id = ?1 AND sender = ?2
                 RETURNING id, received",
                params![communication_id.to_string(), sender.as_bytes()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_error)?;
        deleted
            .map(|(id, received)| {
                Ok((
                    Suuid::parse(&id)?,
                    received
                        .map(|text| timestamp::parse_db_timestamp(&text))
                        .transpose()?,
                ))
            })
            .transpose()
    }

    /// Stamp the first retrieval time; once set it is frozen.
    pub fn mark_communications_retrieved(
        &self,
        communication_ids: &[Suuid],
        retrieved: DateTime<Utc>,
        recipient: &HashedId,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        if communication_ids.is_empty() {
            return Ok(());
        }
        // suuids are plain lowercase hex and hyphens, safe to inline
        let id_list = communication_ids
            .iter()
            .map(|id| format!("'{id}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE communication SET received = ?1
             WHERE received IS NULL AND recipient = ?2 AND id IN ({id_list})"
        );
        self.connection
            .execute(
                &sql,
                params![timestamp::to_db_timestamp(retrieved), recipient.as_bytes()],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// Cascade when a task is deleted.
    pub fn delete_communications_for_task(&self, task_id: &PrescriptionId) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .execute(
                "DELETE FROM communication WHERE prescription_id = ?1 AND prescription_type = ?2",
                params![task_id.database_id(), task_id.flow_type().code()],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// Cascade when a charge item is deleted: only the charge-change
    /// message types go.
    pub fn delete_communications_for_charge_item(
        &self,
        charge_item_id: &PrescriptionId,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .execute(
                "DELETE FROM communication
                 WHERE prescription_id = ?1 AND prescription_type = ?2
                   AND (message_type = ?3 OR message_type = ?4)",
                params![
                    charge_item_id.database_id(),
                    charge_item_id.flow_type().code(),
                    MessageType::ChargChangeReq.as_i16(),
                    MessageType::ChargChangeReply.as_i16()
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// Cascade when an insurant withdraws charge-item consent.
    pub fn delete_charge_item_communications_for_kvnr(
        &self,
        kvnr_hashed: &HashedId,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .execute(
                "DELETE FROM communication
                 WHERE (sender = ?1 OR recipient = ?1)
                   AND (message_type = ?2 OR message_type = ?3)",
                params![
                    kvnr_hashed.as_bytes(),
                    MessageType::ChargChangeReq.as_i16(),
                    MessageType::ChargChangeReply.as_i16()
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use chrono::TimeZone;
    use erx_types::FlowType;
    use rusqlite::Connection;

    fn backend() -> ErxBackend {
        let connection = Connection::open_in_memory().unwrap();
        schema::create_schema(&connection).unwrap();
        ErxBackend::new(connection).unwrap()
    }

    fn hashed(byte: u8) -> HashedId {
        HashedId::from_bytes([byte; 32])
    }

    fn enc(bytes: &[u8]) -> EncryptedBlob {
        EncryptedBlob::new(bytes.to_vec())
    }

    fn prescription() -> PrescriptionId {
        PrescriptionId::new(FlowType::PharmacyOnly, 7).unwrap()
    }

    fn sent(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, minute, 0).unwrap()
    }

    fn insert(
        backend: &ErxBackend,
        sender: &HashedId,
        recipient: &HashedId,
        minute: u32,
    ) -> Suuid {
        backend
            .insert_communication(
                &prescription(),
                sent(minute),
                MessageType::DispReq,
                sender,
                recipient,
                1,
                &enc(b"for sender"),
                1,
                &enc(b"for recipient"),
            )
            .unwrap()
    }

    #[test]
    fn test_ids_order_by_sent_time() {
        let backend = backend();
        let (a, b) = (hashed(0xA1), hashed(0xB2));
        let first = insert(&backend, &a, &b, 1);
        let second = insert(&backend, &a, &b, 2);
        assert!(first.to_string() < second.to_string());
        assert_eq!(first.timestamp(), sent(1));
    }

    #[test]
    fn test_each_side_sees_its_own_ciphertext() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        insert(&backend, &sender, &recipient, 1);

        let as_sender = backend.retrieve_communications(&sender, None, None).unwrap();
        assert_eq!(as_sender.len(), 1);
        assert_eq!(as_sender[0].message, enc(b"for sender"));

        let as_recipient = backend
            .retrieve_communications(&recipient, None, None)
            .unwrap();
        assert_eq!(as_recipient[0].message, enc(b"for recipient"));

        let stranger = backend
            .retrieve_communications(&hashed(0xC3), None, None)
            .unwrap();
        assert!(stranger.is_empty());
    }

    #[test]
    fn test_salt_joined_from_account_table() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        backend
            .insert_or_return_account_salt(
                &sender,
                erx_types::MasterKeyType::Communication,
                1,
                &Blob::new(vec![0x5A; 32]),
            )
            .unwrap();
        insert(&backend, &sender, &recipient, 1);

        let as_sender = backend.retrieve_communications(&sender, None, None).unwrap();
        assert_eq!(as_sender[0].salt, Some(Blob::new(vec![0x5A; 32])));
        // recipient never created a salt row
        let as_recipient = backend
            .retrieve_communications(&recipient, None, None)
            .unwrap();
        assert!(as_recipient[0].salt.is_none());
    }

    #[test]
    fn test_received_is_set_once_and_frozen() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        let id = insert(&backend, &sender, &recipient, 1);

        let first_retrieval = sent(10);
        backend
            .mark_communications_retrieved(&[id], first_retrieval, &recipient)
            .unwrap();
        let rows = backend.retrieve_communications(&recipient, None, None).unwrap();
        assert_eq!(rows[0].received, Some(first_retrieval));

        // a later retrieval does not move the timestamp
        backend
            .mark_communications_retrieved(&[id], sent(20), &recipient)
            .unwrap();
        let rows = backend.retrieve_communications(&recipient, None, None).unwrap();
        assert_eq!(rows[0].received, Some(first_retrieval));
    }

    #[test]
    fn test_only_sender_may_delete() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        let id = insert(&backend, &sender, &recipient, 1);

        assert!(backend.delete_communication(&id, &recipient).unwrap().is_none());
        assert!(backend.exist_communication(&id).unwrap());

        let deleted = backend.delete_communication(&id, &sender).unwrap().unwrap();
        assert_eq!(deleted.0, id);
        assert!(!backend.exist_communication(&id).unwrap());
    }

    #[test]
    fn test_cascades() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        insert(&backend, &sender, &recipient, 1);
        backend
            .insert_communication(
                &prescription(),
                sent(2),
                MessageType::ChargChangeReq,
                &sender,
                &recipient,
                1,
                &enc(b"s"),
                1,
                &enc(b"r"),
            )
            .unwrap();

        // charge item cascade removes only charge-change messages
        backend
            .delete_communications_for_charge_item(&prescription())
            .unwrap();
        assert_eq!(backend.count_communications(&sender, None).unwrap(), 1);

        // task cascade removes the rest
        backend.delete_communications_for_task(&prescription()).unwrap();
        assert_eq!(backend.count_communications(&sender, None).unwrap(), 0);
    }

    #[test]
    fn test_representative_count_is_symmetric() {
        let backend = backend();
        let (a, b) = (hashed(0xA1), hashed(0xB2));
        backend
            .insert_communication(
                &prescription(),
                sent(1),
                MessageType::Representative,
                &a,
                &b,
                1,
                &enc(b"s"),
                1,
                &enc(b"r"),
            )
            .unwrap();
        backend
            .insert_communication(
                &prescription(),
                sent(2),
                MessageType::Representative,
                &b,
                &a,
                1,
                &enc(b"s"),
                1,
                &enc(b"r"),
            )
            .unwrap();

        assert_eq!(
            backend
                .count_representative_communications(&a, &b, &prescription())
                .unwrap(),
            2
        );
        assert_eq!(
            backend
                .count_representative_communications(&b, &a, &prescription())
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_retrieve_communication_ids() {
        let backend = backend();
        let (sender, recipient) = (hashed(0xA1), hashed(0xB2));
        let first = insert(&backend, &sender, &recipient, 1);
        let second = insert(&backend, &sender, &recipient, 2);
        let ids = backend.retrieve_communication_ids(&recipient).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
        assert!(backend.retrieve_communication_ids(&sender).unwrap().is_empty());
    }
}
