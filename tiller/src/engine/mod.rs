use crate::backtest::recorder::{
    signal_frame, ticker_frame, SnapshotRecorder, ENTITY_SIGNALS, ENTITY_TICKERS,
};
use crate::backtest::replay::ReplayDriver;
use crate::backtest::summary::{BacktestSummary, PipelineRunStats};
use crate::config::store::run_config_watcher;
use crate::config::ConfigStore;
use crate::engine::clock::{EngineClock, LiveClock, ReplayClock};
use crate::engine::pipeline::{run_pipeline, PipelineStats};
use crate::event::{run_event_worker, DomainEvent, EventBus};
use crate::executor::intent::{CloseReason, TradeIntent};
use crate::executor::{select_swap_victim, OrderExecutor};
use crate::executor::history::OrderHistory;
use crate::notify::health::{HealthRegistry, MARKER_PERSISTENCE_DEGRADED};
use crate::notify::{LogNotifier, Notifier, NotifierHandle, NotifyLevel, Throttle};
use crate::persistence::trade_log::TradeLog;
use crate::persistence::AccountRepository;
use crate::portfolio::{Account, Portfolio};
use crate::position::Position;
use crate::processor;
use crate::processor::signal::SignalSweep;
use crate::processor::trading::TradeDecision;
use crate::rule::RuleAction;
use crate::trailing::{BuyTrailing, SellTrailing, TrailingManager, TrailingOutcome, TrailingState};
use crate::EngineError;
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use smol_str::{SmolStr, ToSmolStr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiller_execution::client::simulated::SimulatedExchange;
use tiller_execution::client::ExchangeClient;
use tiller_instrument::{Currency, Margin, Money, Price, TradingPair};
use tiller_signal::aggregator::SignalAggregator;
use tiller_signal::{SignalError, SignalProvider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine time sources.
pub mod clock;

/// Cadenced pipeline runner with overrun accounting.
pub mod pipeline;

/// Base cadences of the five pipelines; divided by the replay speed.
const PIPELINES: [(&str, Duration); 5] = [
    ("tickers", Duration::from_secs(1)),
    ("signals", Duration::from_secs(7)),
    ("signal_rules", Duration::from_secs(3)),
    ("trading_rules", Duration::from_secs(3)),
    ("order_execution", Duration::from_secs(1)),
];

const STARTUP_STAGGER: Duration = Duration::from_millis(200);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(20);
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);
const BALANCE_SYNC_EVERY_TICKS: u64 = 60;

/// Composition root for an [`Engine`].
///
/// Virtual & replay modes wire a [`SimulatedExchange`] internally; live mode
/// requires an injected [`ExchangeClient`] implementation.
pub struct EngineBuilder {
    config: Arc<ConfigStore>,
    exchange: Option<Arc<dyn ExchangeClient>>,
    providers: Vec<Arc<dyn SignalProvider>>,
    notifier_sink: Option<Arc<dyn Notifier>>,
    data_dir: PathBuf,
    log_dir: PathBuf,
    record_root: Option<PathBuf>,
    replay_root: Option<PathBuf>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("data_dir", &self.data_dir)
            .field("record_root", &self.record_root)
            .field("replay_root", &self.replay_root)
            .finish()
    }
}

impl EngineBuilder {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            exchange: None,
            providers: Vec::new(),
            notifier_sink: None,
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("log"),
            record_root: None,
            replay_root: None,
        }
    }

    /// Inject a live exchange implementation; otherwise virtual trading uses
    /// the in-process simulator.
    pub fn with_exchange(mut self, exchange: Arc<dyn ExchangeClient>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SignalProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_notifier(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.notifier_sink = Some(sink);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Record live ticker & signal snapshots under `root`.
    pub fn with_recording(mut self, root: impl Into<PathBuf>) -> Self {
        self.record_root = Some(root.into());
        self
    }

    /// Replay a recorded run from `root` instead of trading live.
    pub fn with_replay(mut self, root: impl Into<PathBuf>) -> Self {
        self.replay_root = Some(root.into());
        self
    }

    /// Wire everything together. Must be called within a tokio runtime: the
    /// notifier & event workers are spawned here.
    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config.current();
        let market = config.trading.market_currency()?;
        let token = CancellationToken::new();
        let health = Arc::new(HealthRegistry::new());

        let notifier = if config.notification.enabled {
            let sink = self
                .notifier_sink
                .unwrap_or_else(|| Arc::new(LogNotifier));
            let throttle =
                Throttle::new(Duration::from_secs(config.notification.min_interval_secs));
            let (handle, _worker) = NotifierHandle::new(sink, throttle);
            handle
        } else {
            NotifierHandle::disabled()
        };

        let (events, events_rx) = EventBus::new();
        tokio::spawn(run_event_worker(events_rx, notifier.clone()));

        let aggregator = Arc::new(SignalAggregator::new(
            config
                .signals
                .providers
                .iter()
                .map(|provider| (provider.name.clone(), provider.weight)),
        ));

        let replaying = self.replay_root.is_some();
        let virtual_trading = config.trading.virtual_trading || replaying;

        let repository = AccountRepository::new(&self.data_dir, virtual_trading);
        let account = match repository.load()? {
            Some(account) if account.portfolio.market == market => account,
            Some(account) => {
                return Err(EngineError::Configuration(
                    format!(
                        "persisted account market {} does not match configured market {market}",
                        account.portfolio.market
                    )
                    .to_smolstr(),
                ));
            }
            None => {
                let initial = if virtual_trading {
                    config.trading.initial_virtual_balance
                } else {
                    Decimal::ZERO
                };
                Account::new(Portfolio::new(
                    config.core.instance_name.clone(),
                    market.clone(),
                    initial,
                    config.trading.max_positions,
                    config.trading.min_position_cost,
                ))
            }
        };
        let account = Arc::new(RwLock::new(account));

        let universe = Arc::new(RwLock::new(resolve_universe(&config, &market)));

        // Exchange, clock & replay driver per mode
        let (exchange, clock, replay): (
            Arc<dyn ExchangeClient>,
            Arc<dyn EngineClock>,
            Option<Arc<ReplayDriver>>,
        ) = if let Some(replay_root) = &self.replay_root {
            let simulator = Arc::new(SimulatedExchange::new(
                config.trading.fee_percent,
                Money::new(config.trading.initial_virtual_balance, market.clone()),
            ));
            let driver = Arc::new(ReplayDriver::new(
                replay_root,
                Arc::clone(&simulator),
                Arc::clone(&aggregator),
            )?);
            let base = driver
                .start_time()
                .ok_or_else(|| EngineError::Configuration(SmolStr::new("empty replay stream")))?;
            let clock = Arc::new(ReplayClock::new(base, config.core.speed_multiplier));
            (simulator, clock, Some(driver))
        } else if let Some(exchange) = self.exchange {
            (exchange, Arc::new(LiveClock), None)
        } else {
            let simulator = Arc::new(SimulatedExchange::new(
                config.trading.fee_percent,
                Money::new(config.trading.initial_virtual_balance, market.clone()),
            ));
            (simulator, Arc::new(LiveClock), None)
        };

        let history = Arc::new(OrderHistory::default());
        let executor = Arc::new(OrderExecutor::new(
            Arc::clone(&exchange),
            Arc::clone(&account),
            Arc::clone(&universe),
            Arc::clone(&self.config),
            Arc::clone(&clock),
            events.clone(),
            notifier.clone(),
            Arc::clone(&health),
            Arc::clone(&history),
            Some(TradeLog::new(&self.log_dir)),
            Some(repository),
            token.clone(),
        ));

        let (intents_tx, intents_rx) = mpsc::unbounded_channel();

        let stats = PIPELINES
            .iter()
            .map(|(name, _)| (*name, Arc::new(Mutex::new(PipelineStats::default()))))
            .collect();

        Ok(Engine {
            config: self.config,
            exchange,
            providers: self.providers,
            aggregator,
            account,
            universe,
            prices: Arc::new(RwLock::new(FnvHashMap::default())),
            trailing: Arc::new(TrailingManager::new()),
            executor,
            clock,
            events,
            notifier,
            health,
            token,
            intents_tx,
            intents_rx: Mutex::new(intents_rx),
            recorder: self.record_root.map(SnapshotRecorder::new),
            replay,
            stats,
            ticker_runs: AtomicU64::new(0),
        })
    }
}

/// The market universe: the configured allow-list parsed against the market
/// currency. Replay runs additionally discover pairs from recorded frames.
fn resolve_universe(config: &crate::config::Config, market: &Currency) -> Vec<TradingPair> {
    let Some(allowed) = &config.trading.allowed_pairs else {
        return Vec::new();
    };

    allowed
        .iter()
        .filter_map(|symbol| match TradingPair::from_symbol(symbol, market.clone()) {
            Ok(pair) => Some(pair),
            Err(parse_error) => {
                warn!(%symbol, %parse_error, "skipping unparseable pair in allowed set");
                None
            }
        })
        .collect()
}

/// The running engine: five cadenced pipelines around the shared aggregates.
pub struct Engine {
    config: Arc<ConfigStore>,
    exchange: Arc<dyn ExchangeClient>,
    providers: Vec<Arc<dyn SignalProvider>>,
    aggregator: Arc<SignalAggregator>,
    account: Arc<RwLock<Account>>,
    universe: Arc<RwLock<Vec<TradingPair>>>,
    prices: Arc<RwLock<FnvHashMap<SmolStr, Price>>>,
    trailing: Arc<TrailingManager>,
    executor: Arc<OrderExecutor>,
    clock: Arc<dyn EngineClock>,
    events: EventBus,
    notifier: NotifierHandle,
    health: Arc<HealthRegistry>,
    token: CancellationToken,
    intents_tx: mpsc::UnboundedSender<TradeIntent>,
    intents_rx: Mutex<mpsc::UnboundedReceiver<TradeIntent>>,
    recorder: Option<SnapshotRecorder>,
    replay: Option<Arc<ReplayDriver>>,
    stats: Vec<(&'static str, Arc<Mutex<PipelineStats>>)>,
    ticker_runs: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("providers", &self.providers.len())
            .field("replaying", &self.replay.is_some())
            .finish()
    }
}

impl Engine {
    pub fn builder(config: Arc<ConfigStore>) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Token cancelled on engine stop; external callers (eg/ ctrl-c) cancel
    /// it to request a cooperative shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn account(&self) -> Arc<RwLock<Account>> {
        Arc::clone(&self.account)
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    /// Replace the market universe, eg/ from discovered replay pairs.
    pub fn set_universe(&self, universe: Vec<TradingPair>) {
        *self.universe.write() = universe;
    }

    /// Run the five pipelines until the stop token fires, then drain.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        let speed = self.clock.speed();
        info!(%speed, replaying = self.replay.is_some(), "engine starting");

        let watcher = tokio::spawn(run_config_watcher(
            Arc::clone(&self.config),
            CONFIG_POLL_INTERVAL,
            self.token.clone(),
        ));

        let mut handles = Vec::with_capacity(PIPELINES.len());
        for (index, (name, base_interval)) in PIPELINES.iter().enumerate() {
            let interval = scale_interval(*base_interval, speed);
            let stagger = STARTUP_STAGGER * index as u32;
            let stats = self.stats_for(name);
            let engine = Arc::clone(&self);
            let pipeline_name = *name;

            handles.push(tokio::spawn(run_pipeline(
                pipeline_name,
                interval,
                stagger,
                self.token.clone(),
                Arc::clone(&self.health),
                self.notifier.clone(),
                stats,
                move || {
                    let engine = Arc::clone(&engine);
                    async move { engine.dispatch(pipeline_name).await }
                },
            )));
        }

        self.token.cancelled().await;

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            let _ = watcher.await;
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            warn!(
                drain_secs = SHUTDOWN_DRAIN.as_secs(),
                "pipelines did not drain in time, forcing shutdown"
            );
        }

        info!("engine stopped");
        Ok(())
    }

    fn stats_for(&self, name: &str) -> Arc<Mutex<PipelineStats>> {
        self.stats
            .iter()
            .find(|(stats_name, _)| *stats_name == name)
            .map(|(_, stats)| Arc::clone(stats))
            .expect("pipeline stats are created for every pipeline")
    }

    async fn dispatch(&self, pipeline: &'static str) -> Result<(), EngineError> {
        match pipeline {
            "tickers" => self.tickers_tick().await,
            "signals" => self.signals_tick().await,
            "signal_rules" => self.signal_rules_tick().await,
            "trading_rules" => self.trading_rules_tick().await,
            "order_execution" => self.order_execution_tick().await,
            _ => Ok(()),
        }
    }

    /// Refresh latest prices; in replay mode advance the snapshot stream
    /// first. Periodically reconciles the portfolio balance.
    async fn tickers_tick(&self) -> Result<(), EngineError> {
        let now = self.clock.now();

        if let Some(driver) = &self.replay {
            let more = driver.advance_to(now)?;
            if !more && !self.executor.is_trading_suspended() {
                self.complete_backtest();
                return Ok(());
            }
        }

        let universe = self.universe.read().clone();
        if universe.is_empty() {
            return Ok(());
        }

        let latest = self.exchange.get_prices(&universe, &self.token).await?;
        if !latest.is_empty() {
            self.prices
                .write()
                .extend(latest.iter().map(|(symbol, price)| (symbol.clone(), *price)));

            if let Some(recorder) = &self.recorder {
                let frame = ticker_frame(latest.iter());
                if let Err(record_error) = recorder.write(ENTITY_TICKERS, now, &frame) {
                    warn!(%record_error, "ticker snapshot write failed");
                    self.health.raise(MARKER_PERSISTENCE_DEGRADED);
                }
            }
        }

        let runs = self.ticker_runs.fetch_add(1, Ordering::Relaxed) + 1;
        if runs % BALANCE_SYNC_EVERY_TICKS == 0
            && let Err(sync_error) = self.executor.sync_balance().await
        {
            warn!(%sync_error, "balance sync failed");
        }

        Ok(())
    }

    /// Poll every provider into the aggregator. Replay runs skip this: the
    /// replay driver feeds the aggregator from recorded frames.
    async fn signals_tick(&self) -> Result<(), EngineError> {
        if self.replay.is_some() {
            return Ok(());
        }

        let universe = self.universe.read().clone();
        if universe.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();

        for provider in &self.providers {
            let name = provider.name();
            match provider.signals_for_pairs(&universe, &self.token).await {
                Ok(snapshots) => {
                    if let Some(recorder) = &self.recorder {
                        let frame = signal_frame(
                            &name,
                            snapshots.iter().map(|(symbol, snapshot)| (symbol, snapshot)),
                        );
                        if let Err(record_error) = recorder.write(ENTITY_SIGNALS, now, &frame) {
                            warn!(%record_error, "signal snapshot write failed");
                            self.health.raise(MARKER_PERSISTENCE_DEGRADED);
                        }
                    }
                    self.aggregator.ingest_many(&name, snapshots);
                }
                Err(SignalError::Canceled) => return Err(EngineError::Canceled),
                Err(provider_error) => {
                    // One provider down must not starve the others
                    warn!(provider = %name, %provider_error, "signal sweep failed");
                }
            }
        }

        Ok(())
    }

    /// Produce buy/swap candidates for pairs the portfolio does not hold.
    async fn signal_rules_tick(&self) -> Result<(), EngineError> {
        if self.executor.is_trading_suspended() {
            return Ok(());
        }

        let config = self.config.current();
        if config.rules.signal_rules.is_empty() {
            return Ok(());
        }
        let market = config.trading.market_currency()?;
        let now = self.clock.now();
        let speed = self.clock.speed();

        let prices = self.prices.read().clone();
        let universe = self.universe.read().clone();
        let held: Vec<SmolStr> = self
            .account
            .read()
            .portfolio
            .active_positions()
            .keys()
            .cloned()
            .collect();

        let sweep = SignalSweep {
            universe: &universe,
            prices: &prices,
            held_symbols: &held,
            rules: &config.rules.signal_rules,
            mode: config.rules.processing_mode,
            speed_multiplier: speed,
        };
        let candidates = processor::signal::process(&self.aggregator, &sweep);

        for candidate in candidates {
            self.events.publish(DomainEvent::RuleMatched {
                pair: candidate.pair.clone(),
                rule: candidate.rule.name.clone(),
                action: SmolStr::new(candidate.rule.action.as_str()),
            });

            let cost = Money::new(config.trading.buy_max_cost, market.clone());

            match candidate.rule.action {
                RuleAction::Buy => {
                    if self.trailing.has_state(&candidate.pair.symbol) {
                        continue;
                    }
                    if let Some(trailing_config) = candidate.rule.trailing {
                        self.trailing.initiate_buy(BuyTrailing {
                            pair: candidate.pair.clone(),
                            position_id: None,
                            config: trailing_config,
                            cost,
                            initial_price: candidate.current_price,
                            best_margin: Margin::ZERO,
                            last_margin: Margin::ZERO,
                            signal_rule: Some(candidate.rule.name.clone()),
                            started_at: now,
                        });
                    } else {
                        let _ = self.intents_tx.send(TradeIntent::Open {
                            pair: candidate.pair.clone(),
                            cost,
                            signal_rule: Some(candidate.rule.name.clone()),
                        });
                    }
                }
                RuleAction::Swap => {
                    let victim = {
                        let account = self.account.read();
                        select_swap_victim(&account, &candidate.rule, &prices, now, speed)
                    };
                    if let Some(victim) = victim {
                        let _ = self.intents_tx.send(TradeIntent::Swap {
                            victim,
                            pair: candidate.pair.clone(),
                            cost,
                            signal_rule: Some(candidate.rule.name.clone()),
                        });
                    } else {
                        debug!(
                            pair = %candidate.pair.symbol,
                            rule = %candidate.rule.name,
                            "swap matched but no eligible victim"
                        );
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Sweep the trailing states, then assess every open position.
    async fn trading_rules_tick(&self) -> Result<(), EngineError> {
        if self.executor.is_trading_suspended() {
            return Ok(());
        }

        let config = self.config.current();
        let now = self.clock.now();
        let speed = self.clock.speed();
        let prices = self.prices.read().clone();
        let positions: Vec<Position> = self.account.read().open_positions().cloned().collect();

        for state in self.trailing.snapshot() {
            let pair = match &state {
                TrailingState::Buy(buy) => buy.pair.clone(),
                TrailingState::Sell(sell) => sell.pair.clone(),
            };
            let Some(price) = prices.get(&pair.symbol).copied() else {
                continue;
            };

            let position_margin = match &state {
                TrailingState::Sell(sell) => positions
                    .iter()
                    .find(|position| position.id == sell.position_id)
                    .map(|position| position.calculate_margin(price, None)),
                TrailingState::Buy(_) => None,
            };

            match self.trailing.tick(&pair.symbol, price, position_margin, false) {
                Some(TrailingOutcome::TriggerSell {
                    position_id,
                    reason,
                }) => {
                    self.events.publish(DomainEvent::TrailingTriggered {
                        pair: pair.clone(),
                        side: SmolStr::new("sell"),
                        reason: reason.clone(),
                    });
                    let _ = self.intents_tx.send(TradeIntent::Close {
                        position_id,
                        reason: CloseReason::Trailing(reason),
                    });
                }
                Some(TrailingOutcome::TriggerBuy {
                    position_id,
                    cost,
                    signal_rule,
                    reason,
                }) => {
                    self.events.publish(DomainEvent::TrailingTriggered {
                        pair: pair.clone(),
                        side: SmolStr::new("buy"),
                        reason,
                    });
                    let intent = match position_id {
                        Some(position_id) => TradeIntent::Dca {
                            position_id,
                            cost,
                            rule: signal_rule,
                        },
                        None => TradeIntent::Open {
                            pair: pair.clone(),
                            cost,
                            signal_rule,
                        },
                    };
                    let _ = self.intents_tx.send(intent);
                }
                Some(TrailingOutcome::Cancelled { reason }) => {
                    debug!(pair = %pair.symbol, %reason, "trailing cancelled");
                }
                Some(TrailingOutcome::Disabled)
                | Some(TrailingOutcome::Continue)
                | None => {}
            }
        }

        let assessments = processor::trading::process(
            &positions,
            &prices,
            &self.aggregator,
            &config.rules,
            speed,
            now,
        );

        for assessment in assessments {
            if self.trailing.has_state(&assessment.pair.symbol) {
                // Trailing owns the pair until it triggers or cancels
                continue;
            }

            match assessment.decision {
                TradeDecision::StopLoss => {
                    let _ = self.intents_tx.send(TradeIntent::Close {
                        position_id: assessment.position_id,
                        reason: CloseReason::StopLoss,
                    });
                }
                TradeDecision::TakeProfit => {
                    let _ = self.intents_tx.send(TradeIntent::Close {
                        position_id: assessment.position_id,
                        reason: CloseReason::TakeProfit,
                    });
                }
                TradeDecision::Sell { rule } => {
                    if let Some(trailing_config) = rule.trailing {
                        self.trailing.initiate_sell(SellTrailing {
                            pair: assessment.pair.clone(),
                            position_id: assessment.position_id,
                            config: trailing_config,
                            target_margin: Margin::percent(config.rules.take_profit_margin),
                            initial_price: assessment.current_price,
                            initial_margin: assessment.current_margin,
                            best_margin: assessment.current_margin,
                            last_margin: assessment.current_margin,
                            started_at: now,
                        });
                    } else {
                        let _ = self.intents_tx.send(TradeIntent::Close {
                            position_id: assessment.position_id,
                            reason: CloseReason::Rule(rule.name),
                        });
                    }
                }
                TradeDecision::Dca { rule } => {
                    let Some(cost) = self.dca_cost(&assessment.position_id, &config) else {
                        continue;
                    };
                    if let Some(trailing_config) = rule.trailing {
                        self.trailing.initiate_buy(BuyTrailing {
                            pair: assessment.pair.clone(),
                            position_id: Some(assessment.position_id),
                            config: trailing_config,
                            cost,
                            initial_price: assessment.current_price,
                            best_margin: Margin::ZERO,
                            last_margin: Margin::ZERO,
                            signal_rule: Some(rule.name),
                            started_at: now,
                        });
                    } else {
                        let _ = self.intents_tx.send(TradeIntent::Dca {
                            position_id: assessment.position_id,
                            cost,
                            rule: Some(rule.name),
                        });
                    }
                }
                TradeDecision::Alert { rule } => {
                    self.notifier.send(
                        NotifyLevel::Info,
                        format!(
                            "Alert rule {} matched on {} at margin {}",
                            rule.name, assessment.pair.symbol, assessment.current_margin
                        ),
                    );
                }
                TradeDecision::Hold { .. } => {}
            }
        }

        Ok(())
    }

    /// Drain queued intents through the executor, one at a time.
    async fn order_execution_tick(&self) -> Result<(), EngineError> {
        let intents: Vec<TradeIntent> = {
            let mut rx = self.intents_rx.lock();
            let mut drained = Vec::new();
            while let Ok(intent) = rx.try_recv() {
                drained.push(intent);
            }
            drained
        };

        for intent in intents {
            match self.executor.execute(intent).await {
                Ok(()) => {}
                Err(EngineError::Canceled) => return Err(EngineError::Canceled),
                Err(EngineError::Validation(refusal)) => {
                    debug!(%refusal, "trade intent refused");
                }
                Err(execute_error) => {
                    warn!(%execute_error, "trade intent failed");
                }
            }
        }

        Ok(())
    }

    /// The next DCA buy: the opening entry cost times the configured level
    /// multiplier.
    fn dca_cost(
        &self,
        position_id: &tiller_instrument::PositionId,
        config: &crate::config::Config,
    ) -> Option<Money> {
        let account = self.account.read();
        let position = account.positions.get(position_id)?;
        let base_cost = position.entries().first()?.cost();
        let multiplier = config
            .trading
            .dca_levels
            .get(position.dca_level() as usize)
            .map(|level| level.multiplier)
            .unwrap_or(Decimal::ONE);
        Some(Money::new(
            base_cost * multiplier,
            account.portfolio.market.clone(),
        ))
    }

    fn complete_backtest(&self) {
        let summary = self.backtest_summary();
        info!(?summary, "replay stream exhausted");
        self.events
            .publish(DomainEvent::BacktestingCompleted { summary });
        self.executor.suspend_trading("backtesting completed");
        self.token.cancel();
    }

    /// Run counts, mean per-pipeline lag, trade count & final balance.
    pub fn backtest_summary(&self) -> BacktestSummary {
        let pipelines = self
            .stats
            .iter()
            .map(|(name, stats)| {
                let stats = *stats.lock();
                PipelineRunStats {
                    name: SmolStr::new(*name),
                    runs: stats.runs,
                    mean_lag_ms: stats.mean_lag_ms(),
                    faults: stats.faults,
                }
            })
            .collect();

        BacktestSummary {
            pipelines,
            trades: self.executor.history().len(),
            final_balance: self.account.read().portfolio.balance.total,
        }
    }
}

fn scale_interval(base: Duration, speed: Decimal) -> Duration {
    if speed <= Decimal::ONE {
        return base;
    }
    let millis = Decimal::from(base.as_millis() as u64) / speed;
    Duration::from_millis(millis.to_u64().unwrap_or(1).max(1))
}
