use shared::domain::{PriceQuote, SwapStep};

/// Step tracker for one in-progress swap/buy conversation. Pure data holder;
/// all validation lives in the controller.
///
/// The generation counter ties asynchronous service responses to the flow
/// instance that issued them: `reset()` bumps it, so a response that raced a
/// reset can detect it is stale and must not touch the new flow.
#[derive(Debug, Default)]
pub struct SwapFlowState {
    step: SwapStep,
    from_token: Option<String>,
    to_token: Option<String>,
    amount: Option<f64>,
    quote: Option<PriceQuote>,
    generation: u64,
}

/// Owned copy of the flow fields, safe to hand out without aliasing the
/// mutable record.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub step: SwapStep,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub amount: Option<f64>,
    pub quote: Option<PriceQuote>,
}

impl SwapFlowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> SwapStep {
        self.step
    }

    pub fn from_token(&self) -> Option<&str> {
        self.from_token.as_deref()
    }

    pub fn to_token(&self) -> Option<&str> {
        self.to_token.as_deref()
    }

    pub fn amount(&self) -> Option<f64> {
        self.amount
    }

    pub fn quote(&self) -> Option<&PriceQuote> {
        self.quote.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_step(&mut self, step: SwapStep) {
        self.step = step;
    }

    pub fn set_from_token(&mut self, token: impl Into<String>) {
        self.from_token = Some(token.into());
    }

    pub fn set_to_token(&mut self, token: impl Into<String>) {
        self.to_token = Some(token.into());
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = Some(amount);
    }

    pub fn set_quote(&mut self, quote: PriceQuote) {
        self.quote = Some(quote);
    }

    /// Clears every field back to its initial value. Idempotent with respect
    /// to the observable snapshot; the generation bump only invalidates
    /// in-flight service responses.
    pub fn reset(&mut self) {
        self.step = SwapStep::None;
        self.from_token = None;
        self.to_token = None;
        self.amount = None;
        self.quote = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            step: self.step,
            from_token: self.from_token.clone(),
            to_token: self.to_token.clone(),
            amount: self.amount,
            quote: self.quote.clone(),
        }
    }
}
