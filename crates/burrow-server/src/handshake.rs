//! Handshake engine: startup dispatch, key exchange, login, and resume.
//!
//! The startup preamble and the resume reply travel under the global cipher
//! (or plaintext); a fresh exchange switches the pipe to the negotiated
//! session cipher right after key derivation, and a successful resume
//! reinstalls the stored session cipher before any mux byte.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use burrow_auth::AuthError;
use burrow_crypto::dh::{self, CipherContext};
use burrow_crypto::kdf;
use burrow_metrics::{record_login_failure, record_login_success, record_session_resume};
use burrow_proto::{
    FinishHeader, Preamble, ServerHello, B_FALSE, B_TRUE, MAX_CRED_LEN, MSG_BAD_CREDENTIALS,
    MSG_BAD_CRED_SIZE, REUSE_FAIL_HMAC_FAIL, REUSE_FAIL_START_CIPHER_EXCHANGE, REUSE_SUCCESS,
    SESSION_ID_LEN,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::pipe::SecureStream;
use crate::session::Session;
use crate::state::ServerState;

/// Headroom beyond the hello fields; the client finish must fit in the same
/// scratch allocation.
const FINISH_HEADROOM: usize = 2048;

/// Bound one I/O step by the configured handshake timeout.
async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, ServerError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ServerError::HandshakeTimeout),
    }
}

/// Drive a connection from the startup preamble to an authenticated session.
pub async fn client_startup<S>(
    state: &Arc<ServerState>,
    pipe: &mut SecureStream<S>,
) -> Result<Arc<Session>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = state.handshake_timeout;
    let mut header = [0u8; 4];
    timed(timeout, pipe.read_exact(&mut header)).await?;

    match Preamble::parse(header)? {
        Preamble::NewSession => new_session(state, pipe).await,
        Preamble::Resume {
            id_len,
            rand_len,
            hmac_len,
        } => {
            let mut body = vec![0u8; id_len + rand_len + hmac_len];
            timed(timeout, pipe.read_exact(&mut body)).await?;
            let (id, rest) = body.split_at(id_len);
            let (rand, hmac) = rest.split_at(rand_len);
            resume_session(state, pipe, id, rand, hmac).await
        }
    }
}

/// Fresh key exchange followed by login.
async fn new_session<S>(
    state: &Arc<ServerState>,
    pipe: &mut SecureStream<S>,
) -> Result<Arc<Session>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = state.handshake_timeout;
    let mut ctx = CipherContext::new(dh::DEFAULT_GROUP)?;
    let prime = ctx.prime_bytes();
    let public = ctx.public_bytes();
    let signature = state
        .keystore
        .sign(&ServerHello::signed_data(&prime, dh::GENERATOR, &public))?;

    let hello = ServerHello {
        pub_der: state.keystore.public_der(),
        prime: &prime,
        generator: dh::GENERATOR,
        public: &public,
        signature: &signature,
        methods: state.enc_methods.as_bytes(),
    };
    let hello_bytes = hello.encode();
    timed(timeout, pipe.write_all(&hello_bytes)).await?;

    let capacity = hello_bytes.len() + FINISH_HEADROOM;
    let mut finish_header = [0u8; 4];
    timed(timeout, pipe.read_exact(&mut finish_header)).await?;
    let finish = FinishHeader::parse(finish_header, capacity)?;

    let mut body = vec![0u8; finish.body_len()];
    timed(timeout, pipe.read_exact(&mut body)).await?;
    let (peer_public, method_bytes) = body.split_at(finish.e_len);

    let method_name = std::str::from_utf8(method_bytes).unwrap_or("");
    let method = state
        .offered_method(method_name)
        .ok_or_else(|| ServerError::UnknownMethod(method_name.to_string()))?;

    ctx.derive_keys(peer_public, method.key_size, method.iv_size)?;
    let link_pair = method.build(ctx.crypto_key(), ctx.crypto_iv())?;
    pipe.switch_cipher(link_pair);

    client_login(state, pipe, ctx, method).await
}

/// Read the login request under the session cipher and respond.
async fn client_login<S>(
    state: &Arc<ServerState>,
    pipe: &mut SecureStream<S>,
    cipher_ctx: CipherContext,
    method: &'static burrow_crypto::CipherMethod,
) -> Result<Arc<Session>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = state.handshake_timeout;
    let mut header = [0u8; 4];
    timed(timeout, pipe.read_exact(&mut header)).await?;

    let user_len = header[2] as usize;
    let passwd_len = header[3] as usize;
    if user_len == 0 || user_len > MAX_CRED_LEN || passwd_len == 0 || passwd_len > MAX_CRED_LEN {
        let rep = burrow_proto::write_login_response(false, MSG_BAD_CRED_SIZE.as_bytes());
        timed(timeout, pipe.write_all(&rep)).await?;
        record_login_failure();
        return Err(ServerError::Auth(AuthError::Invalid));
    }

    let mut creds = vec![0u8; user_len + passwd_len];
    timed(timeout, pipe.read_exact(&mut creds)).await?;
    let (user, passwd) = creds.split_at(user_len);

    let verified = match std::str::from_utf8(user) {
        Ok(username) => state
            .users
            .verify(username, passwd)
            .await
            .map(|()| username.to_string()),
        Err(_) => Err(AuthError::Invalid),
    };

    match verified {
        Ok(username) => {
            let session = state.sessions.create(username, cipher_ctx, method);
            let rep = burrow_proto::write_login_response(true, &session.id);
            timed(timeout, pipe.write_all(&rep)).await?;
            record_login_success();
            info!(
                user = %session.username,
                session = %hex::encode(session.id),
                method = method.name,
                "login ok"
            );
            Ok(session)
        }
        Err(_) => {
            let rep = burrow_proto::write_login_response(false, MSG_BAD_CREDENTIALS.as_bytes());
            timed(timeout, pipe.write_all(&rep)).await?;
            record_login_failure();
            debug!("login rejected");
            Err(ServerError::Auth(AuthError::Invalid))
        }
    }
}

/// Verify a resume attempt; fall back to a fresh exchange on HMAC mismatch.
async fn resume_session<S>(
    state: &Arc<ServerState>,
    pipe: &mut SecureStream<S>,
    id: &[u8],
    rand: &[u8],
    hmac: &[u8],
) -> Result<Arc<Session>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = state.handshake_timeout;
    let mut session_id = [0u8; SESSION_ID_LEN];
    session_id.copy_from_slice(id);

    let session = match state.sessions.get(&session_id) {
        Some(session) => session,
        None => {
            record_session_resume("unknown_session");
            debug!(session = %hex::encode(session_id), "resume for unknown session");
            return Err(ServerError::UnknownSession);
        }
    };

    if kdf::hmac_verify(session.cipher_ctx.crypto_key(), rand, hmac) {
        timed(timeout, pipe.write_all(&[B_TRUE, REUSE_SUCCESS])).await?;
        // Reinstall the session cipher at position zero before any mux byte;
        // the client mirrors this switch after reading the reply.
        let link_pair = session
            .method
            .build(session.cipher_ctx.crypto_key(), session.cipher_ctx.crypto_iv())?;
        pipe.switch_cipher(link_pair);
        record_session_resume("success");
        debug!(
            session = %hex::encode(session.id),
            user = %session.username,
            "session resumed"
        );
        Ok(session)
    } else {
        let flags = REUSE_FAIL_START_CIPHER_EXCHANGE | REUSE_FAIL_HMAC_FAIL;
        timed(timeout, pipe.write_all(&[B_FALSE, flags])).await?;
        record_session_resume("hmac_fail");
        debug!(session = %hex::encode(session.id), "resume hmac mismatch, restarting exchange");
        new_session(state, pipe).await
    }
}
