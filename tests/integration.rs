#[cfg(test)]
mod integration_tests {
    use herald::{
        IdentityKeyPair, IdentityKeyStore, InMemoryProtocolStore, PreKeyBundle, PreKeyRecord,
        PreKeyStore, PreKeyWhisperMessage, ProtocolAddress, ProtocolConfig, SessionBuilder,
        SessionCipher, SessionLocks, SessionRecord, SessionStore, SignedPreKeyRecord,
        SignedPreKeyStore, WhisperMessage,
    };

    struct Party {
        address: ProtocolAddress,
        registration_id: u32,
        identity: IdentityKeyPair,
        store: InMemoryProtocolStore,
        locks: SessionLocks,
        config: ProtocolConfig,
    }

    impl Party {
        fn new(name: &str, registration_id: u32) -> Self {
            let identity = IdentityKeyPair::generate().unwrap();
            Self {
                address: ProtocolAddress::new(name, 1),
                registration_id,
                store: InMemoryProtocolStore::new(&identity, registration_id),
                identity,
                locks: SessionLocks::new(),
                config: ProtocolConfig::default(),
            }
        }

        fn publish_bundle(&self, pre_key_id: u32, signed_pre_key_id: u32) -> PreKeyBundle {
            let pre_key = PreKeyRecord::generate(pre_key_id).unwrap();
            self.store.store_pre_key(pre_key_id, &pre_key).unwrap();

            let signed_pre_key =
                SignedPreKeyRecord::generate(signed_pre_key_id, 0, &self.identity).unwrap();
            self.store
                .store_signed_pre_key(signed_pre_key_id, &signed_pre_key)
                .unwrap();

            PreKeyBundle::new(
                self.registration_id,
                self.address.device_id(),
                Some((pre_key_id, pre_key.public_key())),
                (signed_pre_key_id, signed_pre_key.public_key()),
                signed_pre_key.signature().to_vec(),
                self.identity.identity_key(),
            )
        }

        fn builder(&self, remote: &Party) -> SessionBuilder<'_, InMemoryProtocolStore> {
            SessionBuilder::new(&self.store, &self.locks, remote.address.clone(), &self.config)
        }

        fn cipher(&self, remote: &Party) -> SessionCipher<'_, InMemoryProtocolStore> {
            SessionCipher::new(&self.store, &self.locks, remote.address.clone(), &self.config)
        }

        fn send(&self, remote: &Party, plaintext: &str) -> (u32, Vec<u8>) {
            let message = self.cipher(remote).encrypt(plaintext.as_bytes()).unwrap();
            (message.message_type().into(), message.serialize().to_vec())
        }

        fn receive(&self, remote: &Party, (message_type, bytes): &(u32, Vec<u8>)) -> String {
            let cipher = self.cipher(remote);
            let plaintext = match *message_type {
                3 => cipher
                    .decrypt_pre_key_message(&PreKeyWhisperMessage::try_from(bytes.as_slice()).unwrap())
                    .unwrap(),
                _ => cipher
                    .decrypt_message(&WhisperMessage::try_from(bytes.as_slice()).unwrap())
                    .unwrap(),
            };
            String::from_utf8(plaintext).unwrap()
        }
    }

    #[test]
    fn test_full_protocol_flow() {
        println!("Step 1: Creating parties for Alice and Bob...");
        let alice = Party::new("+14155550101", 1001);
        let bob = Party::new("+14155550102", 2001);

        println!("Step 2: Bob publishes his pre-key bundle...");
        let bob_bundle = bob.publish_bundle(31, 7);

        println!("Step 3: Verifying Bob's pre-key bundle...");
        assert!(bob_bundle.verify().is_ok(), "Bundle verification failed");

        println!("Step 4: Alice builds a session from Bob's bundle...");
        let identity_changed = alice.builder(&bob).process_pre_key_bundle(&bob_bundle).unwrap();
        assert!(!identity_changed);

        println!("Step 5: Alice sends the first message...");
        let first = alice.send(&bob, "Hey Bob, this is a secure message!");
        assert_eq!(first.0, 3, "first message carries the handshake");

        println!("Step 6: Bob decrypts and establishes his side...");
        assert_eq!(bob.receive(&alice, &first), "Hey Bob, this is a secure message!");
        assert!(!bob.store.contains_pre_key(31).unwrap());
        assert_eq!(
            bob.store.get_identity(&alice.address).unwrap(),
            Some(alice.identity.identity_key())
        );

        println!("Step 7: Bob replies to Alice...");
        let reply = bob.send(&alice, "Hi Alice! I received your secure message.");
        assert_eq!(reply.0, 1);
        assert_eq!(
            alice.receive(&bob, &reply),
            "Hi Alice! I received your secure message."
        );

        println!("Step 8: Persisting and restoring Alice's session...");
        let saved = alice.store.load_session(&bob.address).unwrap().serialize();
        let restored = SessionRecord::deserialize(&saved).unwrap();
        alice.store.store_session(&bob.address, &restored).unwrap();

        println!("Step 9: Continued communication after restoration...");
        let after_restore = alice.send(&bob, "How's the weather there?");
        assert_eq!(after_restore.0, 1, "handshake no longer repeated");
        assert_eq!(bob.receive(&alice, &after_restore), "How's the weather there?");

        println!("Step 10: Testing out-of-order message delivery...");
        let batch: Vec<_> = ["first", "second", "third", "fourth"]
            .iter()
            .map(|text| alice.send(&bob, text))
            .collect();
        for index in [2, 0, 3, 1] {
            bob.receive(&alice, &batch[index]);
        }

        println!("Step 11: Testing multiple DH ratchet rotations...");
        for round in 0..5 {
            let ping = alice.send(&bob, &format!("ping {round}"));
            assert_eq!(bob.receive(&alice, &ping), format!("ping {round}"));
            let pong = bob.send(&alice, &format!("pong {round}"));
            assert_eq!(alice.receive(&bob, &pong), format!("pong {round}"));
        }

        println!("Step 12: Testing large message...");
        let large = "x".repeat(64 * 1024);
        let message = alice.send(&bob, &large);
        assert_eq!(bob.receive(&alice, &message), large);

        println!("All integration tests passed successfully!");
    }

    #[test]
    fn test_multiple_sessions() {
        println!("Setting up Alice, Bob and Charlie...");
        let alice = Party::new("+14155550101", 1001);
        let bob = Party::new("+14155550102", 2001);
        let charlie = Party::new("+14155550103", 3001);

        println!("Alice creates sessions with Bob and Charlie...");
        alice
            .builder(&bob)
            .process_pre_key_bundle(&bob.publish_bundle(1, 1))
            .unwrap();
        alice
            .builder(&charlie)
            .process_pre_key_bundle(&charlie.publish_bundle(1, 1))
            .unwrap();

        println!("Alice sends messages to Bob and Charlie...");
        let to_bob = alice.send(&bob, "Hello Bob!");
        let to_charlie = alice.send(&charlie, "Hello Charlie!");

        assert_eq!(bob.receive(&alice, &to_bob), "Hello Bob!");
        assert_eq!(charlie.receive(&alice, &to_charlie), "Hello Charlie!");

        println!("Bob and Charlie respond to Alice...");
        let from_bob = bob.send(&alice, "Hi from Bob");
        let from_charlie = charlie.send(&alice, "Hi from Charlie");
        assert_eq!(alice.receive(&charlie, &from_charlie), "Hi from Charlie");
        assert_eq!(alice.receive(&bob, &from_bob), "Hi from Bob");

        println!("A message for Bob cannot be read with Charlie's session...");
        let private = alice.send(&bob, "Bob only");
        let message = WhisperMessage::try_from(private.1.as_slice()).unwrap();
        assert!(charlie.cipher(&alice).decrypt_message(&message).is_err());
        assert_eq!(bob.receive(&alice, &private), "Bob only");

        println!("Multiple session test passed successfully!");
    }

    #[test]
    fn test_session_resumption_after_key_loss() {
        println!("Establishing initial session...");
        let alice = Party::new("+14155550101", 1001);
        let bob = Party::new("+14155550102", 2001);

        alice
            .builder(&bob)
            .process_pre_key_bundle(&bob.publish_bundle(1, 1))
            .unwrap();
        let hello = alice.send(&bob, "hello");
        bob.receive(&alice, &hello);
        let reply = bob.send(&alice, "hello back");
        alice.receive(&bob, &reply);

        println!("Bob loses his session and publishes new pre-keys...");
        bob.store.delete_session(&alice.address).unwrap();
        let fresh_bundle = bob.publish_bundle(2, 2);

        println!("Alice starts over with Bob's new bundle...");
        alice.builder(&bob).process_pre_key_bundle(&fresh_bundle).unwrap();
        let record = alice.store.load_session(&bob.address).unwrap();
        assert_eq!(record.previous_session_count(), 1, "old session is archived");

        let resumed = alice.send(&bob, "are you there?");
        assert_eq!(resumed.0, 3);
        assert_eq!(bob.receive(&alice, &resumed), "are you there?");

        let answer = bob.send(&alice, "yes");
        assert_eq!(alice.receive(&bob, &answer), "yes");

        println!("Session resumption test passed successfully!");
    }

    #[test]
    fn test_responder_keeps_sessions_for_two_handshakes() {
        println!("Alice and Bob start sessions with each other at the same time...");
        let alice = Party::new("+14155550101", 1001);
        let bob = Party::new("+14155550102", 2001);

        alice
            .builder(&bob)
            .process_pre_key_bundle(&bob.publish_bundle(1, 1))
            .unwrap();
        bob.builder(&alice)
            .process_pre_key_bundle(&alice.publish_bundle(1, 1))
            .unwrap();

        let from_alice = alice.send(&bob, "alice first");
        let from_bob = bob.send(&alice, "bob first");

        assert_eq!(bob.receive(&alice, &from_alice), "alice first");
        assert_eq!(alice.receive(&bob, &from_bob), "bob first");

        println!("Both sides keep talking on whichever session is current...");
        let again = alice.send(&bob, "still there?");
        assert_eq!(bob.receive(&alice, &again), "still there?");
        let back = bob.send(&alice, "yes");
        assert_eq!(alice.receive(&bob, &back), "yes");

        let bob_record = bob.store.load_session(&alice.address).unwrap();
        assert!(bob_record.previous_session_count() >= 1);

        println!("Simultaneous initiation test passed successfully!");
    }
}
