//! Safe handle over one open engine stream and its registered callback context.

use std::sync::Arc;
use std::time::Duration;

use pabridge_rt::{
    ensure_bindings, registry, CallbackContext, CallbackFault, FinishReason, FinishedHandler,
    StreamCallback, StreamLayout, StreamStats, StreamToken, STREAM_CALLBACK,
    STREAM_FINISHED_CALLBACK,
};

use crate::config::StreamParameters;
use crate::error::{EngineError, ErrorCode, Result};
use crate::{Engine, EngineStream, StreamInfo};

/// How long `close` waits for a started stream's finished notification before leaking.
const FINISH_GRACE: Duration = Duration::from_secs(2);

/// A callback stream.
///
/// The callback context stays registered until the engine has closed the stream and delivered
/// its finished notification. If the engine cannot confirm that, the context is leaked.
pub struct Stream {
    engine_stream: Option<Box<dyn EngineStream>>,
    context: Arc<CallbackContext>,
    token: Option<StreamToken>,
    started: bool,
}

impl Stream {
    /// Opens a stream on `engine` that calls `callback` for every buffer and `finished` once
    /// when it stops.
    pub fn open<C>(
        engine: &dyn Engine,
        params: &StreamParameters,
        callback: C,
        finished: Option<FinishedHandler>,
    ) -> Result<Self>
    where
        C: StreamCallback + 'static,
    {
        ensure_bindings()?;
        params.validate()?;

        let context = Arc::new(CallbackContext::new(
            params.layout(),
            Box::new(callback),
            finished,
        ));
        let token = registry::global().register(Arc::clone(&context))?;

        // Safety: the trampoline pair resolves `token` through the registry and tolerates any
        // engine input; the context stays registered while the engine can still call it.
        let opened = unsafe {
            engine.open(
                params,
                STREAM_CALLBACK,
                STREAM_FINISHED_CALLBACK,
                token.into_user_data(),
            )
        };
        let engine_stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                // Safety: the engine rejected the stream and never saw the token.
                unsafe {
                    registry::global().unregister(token);
                }
                return Err(err);
            }
        };

        tracing::debug!(
            engine = engine.name(),
            ?token,
            layout = ?params.layout(),
            sample_rate = params.sample_rate,
            "opened stream"
        );
        Ok(Self {
            engine_stream: Some(engine_stream),
            context,
            token: Some(token),
            started: false,
        })
    }

    fn engine(&self) -> Result<&dyn EngineStream> {
        self.engine_stream
            .as_deref()
            .ok_or(EngineError::Native(ErrorCode::BadStreamPtr))
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn EngineStream>> {
        self.engine_stream
            .as_mut()
            .ok_or(EngineError::Native(ErrorCode::BadStreamPtr))
    }

    /// Starts callbacks. A stream runs once; restarting after it stopped is rejected.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(EngineError::StreamReused);
        }
        self.engine_mut()?.start()?;
        self.started = true;
        tracing::info!(token = ?self.token, "stream started");
        Ok(())
    }

    /// Stops after pending buffers have played.
    pub fn stop(&mut self) -> Result<()> {
        self.engine_mut()?.stop()?;
        tracing::info!(token = ?self.token, "stream stopped");
        Ok(())
    }

    /// Stops immediately, discarding pending buffers.
    pub fn abort(&mut self) -> Result<()> {
        self.engine_mut()?.abort()?;
        tracing::info!(token = ?self.token, "stream aborted");
        Ok(())
    }

    pub fn is_active(&self) -> Result<bool> {
        self.engine()?.is_active()
    }

    pub fn is_stopped(&self) -> Result<bool> {
        self.engine()?.is_stopped()
    }

    pub fn cpu_load(&self) -> f64 {
        self.engine().map_or(0.0, |stream| stream.cpu_load())
    }

    /// Stream clock in seconds.
    pub fn time(&self) -> f64 {
        self.engine().map_or(0.0, |stream| stream.time())
    }

    pub fn info(&self) -> Result<StreamInfo> {
        self.engine()?.info()
    }

    pub fn layout(&self) -> StreamLayout {
        self.context.layout()
    }

    pub fn token(&self) -> Option<StreamToken> {
        self.token
    }

    pub fn stats(&self) -> StreamStats {
        self.context.stats()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.context.finish_reason()
    }

    /// Blocks until the finished notification has been delivered or `timeout` elapses.
    pub fn wait_finished(&self, timeout: Duration) -> Option<FinishReason> {
        self.context.wait_finished(timeout)
    }

    /// Removes the recorded callback fault, if any. Only meaningful once the stream finished.
    pub fn take_fault(&self) -> Option<CallbackFault> {
        self.context.take_fault()
    }

    /// Closes the engine stream and releases the callback context, returning any fault the
    /// callback recorded.
    pub fn close(mut self) -> Result<Option<CallbackFault>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Option<CallbackFault>> {
        let Some(mut engine_stream) = self.engine_stream.take() else {
            return Ok(None);
        };

        if let Err(err) = engine_stream.close() {
            tracing::error!(
                %err,
                token = ?self.token,
                "engine failed to close stream, leaking its callback context"
            );
            self.token = None;
            return Err(err);
        }
        drop(engine_stream);

        if self.started && self.context.wait_finished(FINISH_GRACE).is_none() {
            tracing::error!(
                token = ?self.token,
                "engine closed a started stream without finishing it, leaking its callback context"
            );
            self.token = None;
            return Ok(self.context.take_fault());
        }

        if let Some(token) = self.token.take() {
            // Safety: the engine closed the stream and its finished notification (if any) has
            // run, so neither entry point can observe the token again.
            unsafe {
                registry::global().unregister(token);
            }
        }
        let stats = self.context.stats();
        tracing::debug!(
            invocations = stats.invocations,
            frames = stats.frames,
            reason = ?self.context.finish_reason(),
            "closed stream"
        );
        Ok(self.context.take_fault())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        match self.shutdown() {
            Ok(Some(fault)) => tracing::warn!(%fault, "stream dropped with an unretrieved callback fault"),
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "failed to close stream on drop"),
        }
    }
}

impl core::fmt::Debug for Stream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stream")
            .field("token", &self.token)
            .field("open", &self.engine_stream.is_some())
            .field("started", &self.started)
            .field("context", &self.context)
            .finish()
    }
}
