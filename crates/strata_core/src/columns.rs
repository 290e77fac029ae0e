//! Canonical column catalogs for the fixed dataset families.
//!
//! Every entry is `(column name, column comment)`. All family columns are nullable
//! doubles; the key and audit columns are declared in [`crate::schema`].

pub(crate) const DAILY_BAR_COLUMNS: &[(&str, &str)] = &[
    ("open", "opening price"),
    ("high", "highest price"),
    ("low", "lowest price"),
    ("close", "closing price"),
    ("pre_close", "previous close"),
    ("change", "price change"),
    ("pct_chg", "percent change"),
    ("vol", "volume in lots"),
    ("amount", "turnover amount"),
    ("adj_factor", "price adjustment factor"),
    ("turnover_rate", "turnover rate"),
    ("volume_ratio", "volume ratio"),
];

pub(crate) const DAILY_INDICATOR_COLUMNS: &[(&str, &str)] = &[
    ("ma5", "5-day moving average"),
    ("ma10", "10-day moving average"),
    ("ma20", "20-day moving average"),
    ("ma30", "30-day moving average"),
    ("ma60", "60-day moving average"),
    ("ma120", "120-day moving average"),
    ("ma250", "250-day moving average"),
    ("ema5", "5-day exponential moving average"),
    ("ema12", "12-day exponential moving average"),
    ("ema26", "26-day exponential moving average"),
    ("ema60", "60-day exponential moving average"),
    ("macd_dif", "MACD fast line"),
    ("macd_dea", "MACD signal line"),
    ("macd_hist", "MACD histogram"),
    ("rsi6", "6-day relative strength"),
    ("rsi12", "12-day relative strength"),
    ("rsi24", "24-day relative strength"),
    ("kdj_k", "KDJ K"),
    ("kdj_d", "KDJ D"),
    ("kdj_j", "KDJ J"),
    ("boll_upper", "Bollinger upper band"),
    ("boll_mid", "Bollinger middle band"),
    ("boll_lower", "Bollinger lower band"),
    ("atr14", "14-day average true range"),
    ("cci14", "14-day commodity channel index"),
    ("wr6", "6-day Williams %R"),
    ("wr10", "10-day Williams %R"),
    ("obv", "on-balance volume"),
    ("bias6", "6-day bias"),
    ("bias12", "12-day bias"),
    ("bias24", "24-day bias"),
    ("roc12", "12-day rate of change"),
    ("mtm12", "12-day momentum"),
    ("psy12", "12-day psychological line"),
    ("vr26", "26-day volume ratio"),
    ("dmi_pdi", "DMI +DI"),
    ("dmi_mdi", "DMI -DI"),
    ("dmi_adx", "DMI ADX"),
    ("dmi_adxr", "DMI ADXR"),
    ("trix", "triple exponential average"),
    ("cr20", "20-day CR energy"),
    ("brar_ar", "BRAR AR"),
    ("brar_br", "BRAR BR"),
    ("emv", "ease of movement"),
    ("mfi14", "14-day money flow index"),
];

pub(crate) const TECHNICAL_FACTOR_COLUMNS: &[(&str, &str)] = &[
    ("close_qfq", "forward-adjusted close"),
    ("open_qfq", "forward-adjusted open"),
    ("high_qfq", "forward-adjusted high"),
    ("low_qfq", "forward-adjusted low"),
    ("macd_dif", "MACD fast line"),
    ("macd_dea", "MACD signal line"),
    ("macd", "MACD histogram"),
    ("kdj_k", "KDJ K"),
    ("kdj_d", "KDJ D"),
    ("kdj_j", "KDJ J"),
    ("rsi_6", "6-day relative strength"),
    ("rsi_12", "12-day relative strength"),
    ("rsi_24", "24-day relative strength"),
    ("boll_upper", "Bollinger upper band"),
    ("boll_mid", "Bollinger middle band"),
    ("boll_lower", "Bollinger lower band"),
    ("cci", "commodity channel index"),
    ("turnover_rate", "turnover rate"),
    ("volume_ratio", "volume ratio"),
    ("pe", "price to earnings"),
    ("pb", "price to book"),
    ("ps", "price to sales"),
    ("dv_ratio", "dividend yield"),
    ("total_mv", "total market value"),
    ("circ_mv", "circulating market value"),
];

/// Indicators published once per price-adjustment variant in the pro factor family.
pub(crate) const PRO_FACTOR_ADJUSTED_BASES: &[(&str, &str)] = &[
    ("asi", "accumulation swing index"),
    ("asit", "ASI signal"),
    ("atr", "average true range"),
    ("bbi", "bull and bear index"),
    ("bias1", "bias 6"),
    ("bias2", "bias 12"),
    ("bias3", "bias 24"),
    ("boll_lower", "Bollinger lower band"),
    ("boll_mid", "Bollinger middle band"),
    ("boll_upper", "Bollinger upper band"),
    ("brar_ar", "BRAR AR"),
    ("brar_br", "BRAR BR"),
    ("cci", "commodity channel index"),
    ("close", "close"),
    ("cr", "CR energy"),
    ("dfma_dif", "DFMA difference"),
    ("dfma_difma", "DFMA difference average"),
    ("dmi_adx", "DMI ADX"),
    ("dmi_adxr", "DMI ADXR"),
    ("dmi_mdi", "DMI -DI"),
    ("dmi_pdi", "DMI +DI"),
    ("downdays", "consecutive down days"),
    ("updays", "consecutive up days"),
    ("dpo", "detrended price oscillator"),
    ("madpo", "DPO average"),
    ("ema_5", "5-day EMA"),
    ("ema_10", "10-day EMA"),
    ("ema_20", "20-day EMA"),
    ("ema_30", "30-day EMA"),
    ("ema_60", "60-day EMA"),
    ("ema_90", "90-day EMA"),
    ("ema_250", "250-day EMA"),
    ("emv", "ease of movement"),
    ("maemv", "EMV average"),
    ("expma_12", "12-day EXPMA"),
    ("expma_50", "50-day EXPMA"),
    ("high", "high"),
    ("kdj", "KDJ J"),
    ("kdj_d", "KDJ D"),
    ("kdj_k", "KDJ K"),
    ("ktn_down", "Keltner lower channel"),
    ("ktn_mid", "Keltner middle channel"),
    ("ktn_upper", "Keltner upper channel"),
    ("lowdays", "days since period low"),
    ("topdays", "days since period high"),
    ("low", "low"),
    ("ma_5", "5-day MA"),
    ("ma_10", "10-day MA"),
    ("ma_20", "20-day MA"),
    ("ma_30", "30-day MA"),
    ("ma_60", "60-day MA"),
    ("ma_90", "90-day MA"),
    ("ma_250", "250-day MA"),
    ("macd", "MACD histogram"),
    ("macd_dea", "MACD signal line"),
    ("macd_dif", "MACD fast line"),
    ("mass", "mass index"),
    ("ma_mass", "mass index average"),
    ("mfi", "money flow index"),
    ("mtm", "momentum"),
    ("mtmma", "momentum average"),
    ("obv", "on-balance volume"),
    ("open", "open"),
    ("psy", "psychological line"),
    ("psyma", "psychological line average"),
    ("roc", "rate of change"),
    ("maroc", "ROC average"),
    ("rsi_6", "6-day RSI"),
    ("rsi_12", "12-day RSI"),
    ("rsi_24", "24-day RSI"),
    ("taq_down", "Donchian lower channel"),
    ("taq_mid", "Donchian middle channel"),
    ("taq_up", "Donchian upper channel"),
    ("trix", "triple exponential average"),
    ("trma", "TRIX average"),
    ("vr", "volume ratio oscillator"),
    ("wr", "Williams %R 10"),
    ("wr1", "Williams %R 6"),
    ("xsii_td1", "XS II TD1"),
    ("xsii_td2", "XS II TD2"),
    ("xsii_td3", "XS II TD3"),
    ("xsii_td4", "XS II TD4"),
];

pub(crate) const PRO_FACTOR_ADJUSTMENTS: &[(&str, &str)] = &[
    ("bfq", "unadjusted"),
    ("hfq", "back-adjusted"),
    ("qfq", "forward-adjusted"),
];

pub(crate) const PRO_FACTOR_PLAIN_COLUMNS: &[(&str, &str)] = &[
    ("pre_close", "previous close"),
    ("change", "price change"),
    ("pct_chg", "percent change"),
    ("vol", "volume in lots"),
    ("amount", "turnover amount"),
    ("adj_factor", "price adjustment factor"),
    ("turnover_rate", "turnover rate"),
    ("turnover_rate_f", "free-float turnover rate"),
    ("volume_ratio", "volume ratio"),
    ("pe", "price to earnings"),
    ("pe_ttm", "trailing price to earnings"),
    ("pb", "price to book"),
    ("ps", "price to sales"),
    ("ps_ttm", "trailing price to sales"),
    ("dv_ratio", "dividend yield"),
    ("dv_ttm", "trailing dividend yield"),
    ("total_share", "total shares"),
    ("float_share", "float shares"),
    ("free_share", "free-float shares"),
    ("total_mv", "total market value"),
    ("circ_mv", "circulating market value"),
];
