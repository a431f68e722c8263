//! Gemeinsames Test-Geruest: Server-Zustand mit InMemoryStore und
//! statischen Tokens, Clients direkt ueber den Dispatcher.

#![allow(dead_code)]

use parley_auth::StaticTokenProvider;
use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{
    AuthenticateRequest, ErrorCode, SignalMessage, SignalPayload,
};
use parley_signaling::{DispatcherContext, MessageDispatcher, SignalingConfig, SignalingState};
use parley_store::{InMemoryStore, MessageStore};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Umgebung {
    pub state: Arc<SignalingState>,
    pub dispatcher: MessageDispatcher,
    pub store: Arc<InMemoryStore>,
    pub auth: Arc<StaticTokenProvider>,
}

pub struct TestClient {
    pub user_id: UserId,
    pub ctx: DispatcherContext,
    pub rx: mpsc::Receiver<SignalMessage>,
    naechste_id: u32,
}

impl Umgebung {
    pub fn neu() -> Self {
        Self::mit_config(SignalingConfig::default())
    }

    pub fn mit_config(config: SignalingConfig) -> Self {
        let store = Arc::new(InMemoryStore::neu());
        Self::mit_nachrichten_store(config, store.clone(), store)
    }

    /// Eigener MessageStore (z.B. ein langsamer), Teilnehmer aus dem InMemoryStore
    pub fn mit_nachrichten_store(
        config: SignalingConfig,
        store: Arc<InMemoryStore>,
        nachrichten: Arc<dyn MessageStore>,
    ) -> Self {
        let auth = Arc::new(StaticTokenProvider::neu());
        let state = SignalingState::neu(config, auth.clone(), nachrichten, store.clone());
        Self {
            dispatcher: MessageDispatcher::neu(Arc::clone(&state)),
            state,
            store,
            auth,
        }
    }

    pub fn konversation(&self, teilnehmer: &[UserId]) -> ConversationId {
        self.store.konversation_anlegen(teilnehmer.iter().copied())
    }

    /// Oeffnet eine Verbindung ohne Authentifizierung
    pub fn verbinden(&self, user_id: UserId) -> TestClient {
        let verbindung = ConnectionId::naechste();
        let rx = self
            .dispatcher
            .verbindung_oeffnen(verbindung)
            .expect("Verbindung sollte angenommen werden");
        TestClient {
            user_id,
            ctx: DispatcherContext::neu(verbindung, None),
            rx,
            naechste_id: 1,
        }
    }

    /// Oeffnet eine Verbindung und authentifiziert sie
    pub async fn anmelden(&self, user_id: UserId) -> TestClient {
        let token = format!("token-{}", user_id);
        self.auth.token_eintragen(token.clone(), user_id);
        let mut client = self.verbinden(user_id);
        let antwort = self
            .anfrage(&mut client, SignalPayload::Authenticate(AuthenticateRequest { token }))
            .await
            .expect("Authenticate braucht eine Antwort");
        match antwort.payload {
            SignalPayload::Authenticated(a) => assert_eq!(a.user_id, user_id),
            andere => panic!("Erwartet Authenticated, erhalten {}", andere.typ_name()),
        }
        client
    }

    pub async fn anfrage(
        &self,
        client: &mut TestClient,
        payload: SignalPayload,
    ) -> Option<SignalMessage> {
        let request_id = client.naechste_id;
        client.naechste_id += 1;
        let antwort = self
            .dispatcher
            .dispatch(SignalMessage::new(request_id, payload), &mut client.ctx)
            .await;
        if let Some(ref a) = antwort {
            assert_eq!(a.request_id, request_id, "Antwort traegt die request_id");
        }
        antwort
    }

    /// Anfrage, deren Antwort `ok` sein muss
    pub async fn ok(&self, client: &mut TestClient, payload: SignalPayload) {
        let antwort = self.anfrage(client, payload).await.expect("Antwort erwartet");
        match antwort.payload {
            SignalPayload::Ok => {}
            andere => panic!("Erwartet Ok, erhalten {:?}", andere),
        }
    }

    /// Anfrage, deren Antwort ein Fehler mit diesem Code sein muss
    pub async fn fehler(&self, client: &mut TestClient, payload: SignalPayload) -> ErrorCode {
        let antwort = self.anfrage(client, payload).await.expect("Antwort erwartet");
        match antwort.payload {
            SignalPayload::Error(e) => e.code,
            andere => panic!("Erwartet Error, erhalten {:?}", andere),
        }
    }

    pub async fn beitreten(&self, client: &mut TestClient, conversation_id: ConversationId) {
        self.ok(client, SignalPayload::JoinRoom { conversation_id }).await;
    }

    pub async fn trennen(&self, client: &TestClient) {
        self.dispatcher.verbindung_trennen(client.ctx.verbindung).await;
    }
}

impl TestClient {
    pub fn verbindung(&self) -> ConnectionId {
        self.ctx.verbindung
    }

    /// Alle bisher zugestellten Pushes
    pub fn empfangen(&mut self) -> Vec<SignalPayload> {
        let mut aus = Vec::new();
        while let Ok(nachricht) = self.rx.try_recv() {
            assert_eq!(nachricht.request_id, 0, "Pushes tragen request_id 0");
            aus.push(nachricht.payload);
        }
        aus
    }

    /// Pushes ohne Presence-Meldungen
    pub fn ereignisse(&mut self) -> Vec<SignalPayload> {
        self.empfangen()
            .into_iter()
            .filter(|p| {
                !matches!(
                    p,
                    SignalPayload::UserOnline { .. } | SignalPayload::UserOffline { .. }
                )
            })
            .collect()
    }

    pub fn leeren(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

pub fn typen(payloads: &[SignalPayload]) -> Vec<&'static str> {
    payloads.iter().map(|p| p.typ_name()).collect()
}
