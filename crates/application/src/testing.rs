//! Test doubles shared by the unit tests of this crate

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use domain::{AudioFormat, ProviderCategory, ProviderIdentity, SynthesisRequest};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    config::ProviderSettings,
    error::ApplicationError,
    ports::{
        CachePort, CacheStats, HealthCheckable, ProviderError, ProviderFactory, ProviderHandle,
        ProviderLifecycle, SpeechToTextProvider, SynthesisOutput, TextToSpeechProvider,
        TranscriptionOutput,
    },
    resilience::ProviderSession,
};

/// How a fake provider answers calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Succeed,
    Transient,
    Permanent,
    Hang,
}

/// Scriptable provider usable for either category
#[derive(Debug)]
pub struct FakeProvider {
    name: String,
    mode: Mutex<Mode>,
    probe: Option<AtomicBool>,
    calls: AtomicU32,
    initialized: AtomicU32,
    cleaned_up: AtomicU32,
}

impl FakeProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, None, Mode::Succeed))
    }

    fn build(name: &str, probe: Option<bool>, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            mode: Mutex::new(mode),
            probe: probe.map(AtomicBool::new),
            calls: AtomicU32::new(0),
            initialized: AtomicU32::new(0),
            cleaned_up: AtomicU32::new(0),
        }
    }

    /// Give the provider a health probe answering `healthy`
    pub fn with_probe(self: Arc<Self>, healthy: bool) -> Arc<Self> {
        let mode = self.mode.lock().clone();
        Arc::new(Self::build(&self.name, Some(healthy), mode))
    }

    pub fn with_mode(self: Arc<Self>, mode: Mode) -> Arc<Self> {
        self.set_mode(mode);
        self
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn set_probe(&self, healthy: bool) {
        if let Some(probe) = &self.probe {
            probe.store(healthy, Ordering::SeqCst);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> u32 {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn cleaned_up(&self) -> u32 {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().clone();
        match mode {
            Mode::Succeed => Ok(()),
            Mode::Transient => Err(ProviderError::transient(format!("{} unavailable", self.name))),
            Mode::Permanent => Err(ProviderError::permanent(format!("{} rejected key", self.name))),
            Mode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            },
        }
    }
}

#[async_trait]
impl ProviderLifecycle for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
    }

    fn as_health_checkable(&self) -> Option<&dyn HealthCheckable> {
        if self.probe.is_some() { Some(self) } else { None }
    }
}

#[async_trait]
impl HealthCheckable for FakeProvider {
    async fn health_check(&self) -> bool {
        let hang = *self.mode.lock() == Mode::Hang;
        if hang {
            std::future::pending::<()>().await;
        }
        self.probe
            .as_ref()
            .is_some_and(|probe| probe.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SpeechToTextProvider for FakeProvider {
    async fn transcribe(
        &self,
        _session: &ProviderSession,
        _audio: &[u8],
        language: &str,
    ) -> Result<TranscriptionOutput, ProviderError> {
        self.answer().await?;
        Ok(TranscriptionOutput::new(format!("{} transcript", self.name))
            .with_confidence(0.9)
            .with_language(language))
    }
}

#[async_trait]
impl TextToSpeechProvider for FakeProvider {
    async fn synthesize(
        &self,
        _session: &ProviderSession,
        request: &SynthesisRequest,
    ) -> Result<SynthesisOutput, ProviderError> {
        self.answer().await?;
        Ok(SynthesisOutput::new(
            format!("{}:{}", self.name, request.text()).into_bytes(),
            request.format().unwrap_or(AudioFormat::Mp3),
        ))
    }
}

/// Factory handing out registered fakes
#[derive(Debug, Default)]
pub struct FakeFactory {
    stt: HashMap<String, Arc<FakeProvider>>,
    tts: HashMap<String, Arc<FakeProvider>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    created: Mutex<HashMap<ProviderIdentity, u32>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stt(mut self, provider: Arc<FakeProvider>) -> Self {
        self.stt.insert(provider.name.clone(), provider);
        self
    }

    pub fn with_tts(mut self, provider: Arc<FakeProvider>) -> Self {
        self.tts.insert(provider.name.clone(), provider);
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn created(&self, identity: &ProviderIdentity) -> u32 {
        self.created.lock().get(identity).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProviderFactory for FakeFactory {
    async fn create(
        &self,
        identity: &ProviderIdentity,
        _settings: &ProviderSettings,
    ) -> Result<ProviderHandle, ProviderError> {
        *self.created.lock().entry(identity.clone()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(identity.name()) {
            return Err(ProviderError::permanent("construction failed"));
        }

        let registered = match identity.category() {
            ProviderCategory::Stt => self.stt.get(identity.name()),
            ProviderCategory::Tts => self.tts.get(identity.name()),
        };
        let provider = registered
            .cloned()
            .ok_or_else(|| ProviderError::permanent(format!("unknown provider {identity}")))?;

        Ok(match identity.category() {
            ProviderCategory::Stt => ProviderHandle::Stt(provider),
            ProviderCategory::Tts => ProviderHandle::Tts(provider),
        })
    }
}

/// In-memory cache with TTL on the tokio clock
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    hits: AtomicU32,
    misses: AtomicU32,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CachePort for MemoryCache {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, ApplicationError> {
        let now = Instant::now();
        let value = self
            .entries
            .lock()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        } else {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    async fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), ApplicationError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, ApplicationError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, ApplicationError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: u64::from(self.hits.load(Ordering::SeqCst)),
            misses: u64::from(self.misses.load(Ordering::SeqCst)),
            entries: self.entries.lock().len() as u64,
            memory_bytes: 0,
        }
    }
}
