//! Black-box policy-gate scenarios: STEALTH invite-token lifecycle and
//! allowlist rejection, driven only through the public `Peer` API.

use snap2p_core::codec::Visibility;
use snap2p_core::config::PeerConfig;
use snap2p_core::invite_token::InviteTokenOptions;
use snap2p_core::peer::Peer;
use snap2p_core::wallet::EphemeralWallet;
use std::collections::BTreeSet;
use std::sync::Arc;

fn peer_with(visibility: Visibility, allowlist: Option<BTreeSet<String>>) -> Peer {
    let config = PeerConfig {
        visibility,
        allowlist,
        ..PeerConfig::default()
    };
    Peer::new(Arc::new(EphemeralWallet::generate()), config)
}

#[tokio::test]
async fn single_use_stealth_token_cannot_be_replayed() {
    let server = peer_with(Visibility::Stealth, None);
    let client_a = peer_with(Visibility::Public, None);
    let client_b = peer_with(Visibility::Public, None);
    let locator = server.listen(0, "127.0.0.1").await.unwrap();

    let token = server
        .generate_invite_token(InviteTokenOptions {
            single_use: true,
            ..InviteTokenOptions::default()
        })
        .unwrap();

    let (first_dial, first_accept) =
        tokio::join!(client_a.dial(&locator, Some(token.clone())), server.accept());
    first_dial.unwrap();
    first_accept.unwrap();
    assert_eq!(server.invite_token_count().unwrap(), 0);

    let reused = client_b.dial(&locator, Some(token)).await;
    assert!(reused.is_err());
}

#[tokio::test]
async fn revoked_token_is_rejected() {
    let server = peer_with(Visibility::Stealth, None);
    let client = peer_with(Visibility::Public, None);
    let locator = server.listen(0, "127.0.0.1").await.unwrap();

    let token = server
        .generate_invite_token(InviteTokenOptions::default())
        .unwrap();
    assert!(server.revoke_invite_token(&token).unwrap());

    let result = client.dial(&locator, Some(token)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn allowlisted_principal_is_admitted_others_are_not() {
    let allowed_client = peer_with(Visibility::Private, None);
    let other_client = peer_with(Visibility::Private, None);

    let mut allowlist = BTreeSet::new();
    allowlist.insert(allowed_client.principal().as_str().to_string());
    let server = peer_with(Visibility::Private, Some(allowlist));
    let locator = server.listen(0, "127.0.0.1").await.unwrap();

    let (ok_dial, ok_accept) = tokio::join!(allowed_client.dial(&locator, None), server.accept());
    ok_dial.unwrap();
    ok_accept.unwrap();

    let locator2 = server.listen(0, "127.0.0.1").await.unwrap();
    let rejected = other_client.dial(&locator2, None).await;
    assert!(rejected.is_err());
}

#[tokio::test]
async fn imported_token_with_max_uses_expires_after_limit() {
    let server = peer_with(Visibility::Stealth, None);
    let client_a = peer_with(Visibility::Public, None);
    let client_b = peer_with(Visibility::Public, None);
    let client_c = peer_with(Visibility::Public, None);

    let token = vec![0x42u8; 24];
    server
        .import_invite_token(
            token.clone(),
            InviteTokenOptions {
                max_uses: Some(2),
                ..InviteTokenOptions::default()
            },
        )
        .unwrap();

    let locator = server.listen(0, "127.0.0.1").await.unwrap();
    let (d1, a1) = tokio::join!(client_a.dial(&locator, Some(token.clone())), server.accept());
    d1.unwrap();
    a1.unwrap();
    let (d2, a2) = tokio::join!(client_b.dial(&locator, Some(token.clone())), server.accept());
    d2.unwrap();
    a2.unwrap();

    let d3 = client_c.dial(&locator, Some(token)).await;
    assert!(d3.is_err());
}
